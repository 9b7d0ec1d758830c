use std::{fmt, sync::Arc};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use tokio_util::sync::CancellationToken;

use crate::{
    decimal::BigDecimal,
    types::{QueryError, QueryStats},
};

/// A positional statement parameter, bound by rewriting the statement into
/// `EXECUTE <name> USING <literals>`.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryParameter {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampWithTimeZone(DateTime<FixedOffset>),
    Interval(TimeDelta),
    Binary(Vec<u8>),
    Uuid(uuid::Uuid),
    List(Vec<QueryParameter>),
}

impl QueryParameter {
    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            QueryParameter::Null => "NULL".to_owned(),
            QueryParameter::Boolean(true) => "TRUE".to_owned(),
            QueryParameter::Boolean(false) => "FALSE".to_owned(),
            QueryParameter::Integer(value) => value.to_string(),
            QueryParameter::Double(value) if value.is_nan() => "nan()".to_owned(),
            QueryParameter::Double(value) if value.is_infinite() => {
                if value.is_sign_positive() {
                    "infinity()".to_owned()
                } else {
                    "-infinity()".to_owned()
                }
            }
            QueryParameter::Double(value) => format!("DOUBLE '{value:e}'"),
            QueryParameter::Decimal(value) => format!("DECIMAL '{value}'"),
            QueryParameter::Text(value) => quote(value),
            QueryParameter::Date(value) => format!("DATE '{}'", value.format("%Y-%m-%d")),
            QueryParameter::Timestamp(value) => {
                format!("timestamp '{}'", value.format("%Y-%m-%d %H:%M:%S%.3f"))
            }
            QueryParameter::TimestampWithTimeZone(value) => format!(
                "CAST('{}' AS timestamp with time zone)",
                value.format("%Y-%m-%d %H:%M:%S%.3f %:z")
            ),
            QueryParameter::Interval(value) => format!("INTERVAL '{}' DAY TO SECOND", day_to_second(value)),
            QueryParameter::Binary(bytes) => {
                let hex: String = bytes.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
            QueryParameter::Uuid(value) => format!("UUID '{value}'"),
            QueryParameter::List(items) => {
                let items: Vec<String> = items.iter().map(QueryParameter::to_sql_literal).collect();
                format!("({})", items.join(", "))
            }
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn day_to_second(value: &TimeDelta) -> String {
    let sign = if *value < TimeDelta::zero() { "-" } else { "" };
    let value = value.abs();
    let seconds = value.num_seconds();
    let millis = value.subsec_nanos() / 1_000_000;
    format!(
        "{sign}{} {:02}:{:02}:{:02}.{millis:03}",
        seconds / 86_400,
        (seconds / 3_600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    )
}

macro_rules! impl_from_param {
    ($($source:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$source> for QueryParameter {
                fn from(value: $source) -> Self {
                    QueryParameter::$variant(value.into())
                }
            }
        )+
    };
}

impl_from_param! {
    bool => Boolean,
    i8 => Integer,
    i16 => Integer,
    i32 => Integer,
    i64 => Integer,
    f32 => Double,
    f64 => Double,
    BigDecimal => Decimal,
    String => Text,
    &str => Text,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
    DateTime<FixedOffset> => TimestampWithTimeZone,
    TimeDelta => Interval,
    Vec<u8> => Binary,
    uuid::Uuid => Uuid,
}

impl<T: Into<QueryParameter>> From<Option<T>> for QueryParameter {
    fn from(value: Option<T>) -> Self {
        value.map_or(QueryParameter::Null, Into::into)
    }
}

/// Callback receiving the final statistics, and the error if the query failed.
pub type StatusListener = Arc<dyn Fn(&QueryStats, Option<&QueryError>) + Send + Sync>;

/// A statement to submit, with its parameters and per-query controls.
#[derive(Clone)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    pub params: Vec<QueryParameter>,
    /// Whether rows are read by the caller. Statements that do not yield rows
    /// are drained to completion without a buffer limit.
    pub want_rows: bool,
    /// Cancels the query at the next page boundary when triggered.
    pub cancellation: Option<CancellationToken>,
    pub listeners: Vec<StatusListener>,
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("want_rows", &self.want_rows)
            .field("cancellation", &self.cancellation.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Statement {
    /// Creates a row-returning statement.
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            want_rows: true,
            cancellation: None,
            listeners: Vec::new(),
        }
    }

    /// Creates a statement whose rows, if any, are discarded.
    pub fn execute(sql: impl Into<String>) -> Self {
        Self {
            want_rows: false,
            ..Self::query(sql)
        }
    }

    pub fn bind(mut self, param: impl Into<QueryParameter>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<QueryParameter>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Registers a callback fired once with the final statistics.
    pub fn on_status<F>(mut self, listener: F) -> Self
    where
        F: Fn(&QueryStats, Option<&QueryError>) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// The SQL text to submit and, for parameterized statements, the
    /// transient prepared statement `(name, sql)` it executes.
    pub(crate) fn submission(&self, protocol_name: &str) -> (String, Option<(String, String)>) {
        if self.params.is_empty() {
            return (self.sql.clone(), None);
        }
        let name = format!(
            "{}{}",
            protocol_name.to_ascii_lowercase(),
            uuid::Uuid::new_v4().simple()
        );
        let literals: Vec<String> = self.params.iter().map(QueryParameter::to_sql_literal).collect();
        let sql = format!("EXECUTE {name} USING {}", literals.join(", "));
        (sql, Some((name, self.sql.clone())))
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::query(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::query(sql)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeDelta};

    use crate::{QueryParameter, Statement};

    #[test]
    fn strings_are_quoted_and_escaped() {
        assert_eq!(QueryParameter::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(QueryParameter::from(None::<i32>).to_sql_literal(), "NULL");
        assert_eq!(QueryParameter::from(true).to_sql_literal(), "TRUE");
        assert_eq!(QueryParameter::from(-7i32).to_sql_literal(), "-7");
    }

    #[test]
    fn temporal_values_carry_casts() {
        let timestamp = NaiveDate::from_ymd_opt(2023, 4, 4)
            .and_then(|date| date.and_hms_milli_opt(1, 2, 3, 4))
            .expect("valid timestamp");
        assert_eq!(
            QueryParameter::from(timestamp).to_sql_literal(),
            "timestamp '2023-04-04 01:02:03.004'"
        );

        let zoned = DateTime::parse_from_rfc3339("2023-04-04T01:02:03.004+05:00").expect("valid");
        assert_eq!(
            QueryParameter::from(zoned).to_sql_literal(),
            "CAST('2023-04-04 01:02:03.004 +05:00' AS timestamp with time zone)"
        );

        let interval = TimeDelta::try_milliseconds(-(26 * 3_600_000 + 1_500)).expect("in range");
        assert_eq!(
            QueryParameter::from(interval).to_sql_literal(),
            "INTERVAL '-1 02:00:01.500' DAY TO SECOND"
        );
    }

    #[test]
    fn binary_and_lists() {
        assert_eq!(QueryParameter::from(vec![0x0Au8, 0xFF]).to_sql_literal(), "X'0AFF'");
        let list = QueryParameter::List(vec![1i64.into(), "a".into(), QueryParameter::Null]);
        assert_eq!(list.to_sql_literal(), "(1, 'a', NULL)");
    }

    #[test]
    fn doubles_render_exactly() {
        assert_eq!(QueryParameter::from(1.5f64).to_sql_literal(), "DOUBLE '1.5e0'");
        assert_eq!(QueryParameter::from(f64::NAN).to_sql_literal(), "nan()");
        assert_eq!(QueryParameter::from(f64::NEG_INFINITY).to_sql_literal(), "-infinity()");
    }

    #[test]
    fn parameterized_statement_becomes_execute() {
        let statement = Statement::query("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1)
            .bind("x");
        let (sql, prepared) = statement.submission("Trino");
        let (name, original) = prepared.expect("prepared statement");

        assert!(name.starts_with("trino"));
        assert_eq!(name.len(), "trino".len() + 32);
        assert_eq!(original, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(sql, format!("EXECUTE {name} USING 1, 'x'"));
    }

    #[test]
    fn plain_statement_is_sent_as_is() {
        let (sql, prepared) = Statement::execute("CREATE TABLE t (a int)").submission("Trino");
        assert_eq!(sql, "CREATE TABLE t (a int)");
        assert!(prepared.is_none());
    }
}
