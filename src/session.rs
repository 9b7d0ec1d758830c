use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::{Arc, RwLock},
    time::Duration,
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::{form_urlencoded, Url};

use crate::{
    headers::{ProtocolHeaders, DEFAULT_PROTOCOL_NAME},
    TrinoError,
};

/// Source reported to the server when the caller does not name one.
pub const DEFAULT_SOURCE: &str = "trino-http";

const CLIENT_CAPABILITIES: &str = "PARAMETRIC_DATETIME";

/// Role selected for a catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SelectedRole {
    Role(String),
    All,
    None,
}

impl fmt::Display for SelectedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectedRole::Role(name) => write!(f, "ROLE{{{name}}}"),
            SelectedRole::All => f.write_str("ALL"),
            SelectedRole::None => f.write_str("NONE"),
        }
    }
}

impl FromStr for SelectedRole {
    type Err = TrinoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("ALL") {
            return Ok(SelectedRole::All);
        }
        if value.eq_ignore_ascii_case("NONE") {
            return Ok(SelectedRole::None);
        }
        value
            .strip_prefix("ROLE{")
            .and_then(|rest| rest.strip_suffix('}'))
            .filter(|name| !name.is_empty())
            .map(|name| SelectedRole::Role(name.to_owned()))
            .ok_or_else(|| TrinoError::Decode(format!("invalid selected role '{value}'")))
    }
}

/// Server-visible settings sent with every statement.
///
/// Values are never changed in place while a query runs. Server-pushed
/// changes are folded in with [`SessionProperties::merge`], which returns a
/// new value.
#[derive(Clone, PartialEq)]
pub struct SessionProperties {
    pub server: Url,
    pub user: Option<String>,
    pub source: String,
    pub protocol_name: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub path: Option<String>,
    pub time_zone: Option<String>,
    pub locale: Option<String>,
    pub trace_token: Option<String>,
    pub client_info: Option<String>,
    pub client_tags: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub prepared_statements: BTreeMap<String, String>,
    pub resource_estimates: BTreeMap<String, String>,
    pub roles: BTreeMap<String, SelectedRole>,
    pub extra_credentials: BTreeMap<String, String>,
    pub transaction_id: Option<String>,
    pub authorization_user: Option<String>,
    pub additional_headers: BTreeMap<String, String>,
}

impl fmt::Debug for SessionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extra_credentials: BTreeMap<&str, &str> = self
            .extra_credentials
            .keys()
            .map(|name| (name.as_str(), "<redacted>"))
            .collect();
        f.debug_struct("SessionProperties")
            .field("server", &self.server.as_str())
            .field("user", &self.user)
            .field("source", &self.source)
            .field("protocol_name", &self.protocol_name)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("path", &self.path)
            .field("time_zone", &self.time_zone)
            .field("locale", &self.locale)
            .field("trace_token", &self.trace_token)
            .field("client_info", &self.client_info)
            .field("client_tags", &self.client_tags)
            .field("properties", &self.properties)
            .field("prepared_statements", &self.prepared_statements)
            .field("resource_estimates", &self.resource_estimates)
            .field("roles", &self.roles)
            .field("extra_credentials", &extra_credentials)
            .field("transaction_id", &self.transaction_id)
            .field("authorization_user", &self.authorization_user)
            .field("additional_headers", &self.additional_headers)
            .finish()
    }
}

impl SessionProperties {
    /// Creates a session for the coordinator at `server`, e.g. `http://localhost:8080`.
    pub fn new(server: &str) -> Result<Self, TrinoError> {
        let server = Url::parse(server.trim())
            .map_err(|err| TrinoError::Config(format!("invalid server URL '{server}': {err}")))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(TrinoError::Config(format!(
                "server URL must use http or https, got '{}'",
                server.scheme()
            )));
        }
        Ok(Self {
            server,
            user: None,
            source: DEFAULT_SOURCE.to_owned(),
            protocol_name: DEFAULT_PROTOCOL_NAME.to_owned(),
            catalog: None,
            schema: None,
            path: None,
            time_zone: None,
            locale: None,
            trace_token: None,
            client_info: None,
            client_tags: BTreeSet::new(),
            properties: BTreeMap::new(),
            prepared_statements: BTreeMap::new(),
            resource_estimates: BTreeMap::new(),
            roles: BTreeMap::new(),
            extra_credentials: BTreeMap::new(),
            transaction_id: None,
            authorization_user: None,
            additional_headers: BTreeMap::new(),
        })
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn with_protocol_name(mut self, name: impl Into<String>) -> Self {
        self.protocol_name = name.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tags.insert(tag.into());
        self
    }

    pub fn with_role(mut self, catalog: impl Into<String>, role: SelectedRole) -> Self {
        self.roles.insert(catalog.into(), role);
        self
    }

    /// Sets the execution time limit as the `query_max_run_time` session property.
    pub fn with_query_max_run_time(self, limit: Duration) -> Self {
        self.with_property("query_max_run_time", format!("{}ms", limit.as_millis()))
    }

    pub fn with_resource_estimate(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_estimates.insert(name.into(), value.into());
        self
    }

    pub fn with_extra_credential(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_credentials.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }

    pub fn protocol_headers(&self) -> Result<ProtocolHeaders, TrinoError> {
        ProtocolHeaders::new(self.protocol_name.as_str())
    }

    /// Applies server-pushed changes, producing a new session.
    ///
    /// Settings the update does not mention keep their current value. Pushed
    /// session properties win over existing ones. Added prepared statements
    /// never replace one already registered under the same name, and
    /// deallocations are applied after additions.
    pub fn merge(&self, update: &SessionUpdate) -> SessionProperties {
        let mut merged = self.clone();

        merged.authorization_user = if update.reset_authorization_user {
            None
        } else {
            update
                .set_authorization_user
                .clone()
                .or_else(|| self.authorization_user.clone())
        };
        if let Some(catalog) = &update.set_catalog {
            merged.catalog = Some(catalog.clone());
        }
        if let Some(schema) = &update.set_schema {
            merged.schema = Some(schema.clone());
        }
        if let Some(path) = &update.set_path {
            merged.path = Some(path.clone());
        }

        for (name, sql) in &update.added_prepare {
            merged
                .prepared_statements
                .entry(name.clone())
                .or_insert_with(|| sql.clone());
        }
        for name in &update.deallocated_prepare {
            merged.prepared_statements.remove(name);
        }

        for (name, value) in &update.set_session {
            merged.properties.insert(name.clone(), value.clone());
        }
        for name in &update.clear_session {
            merged.properties.remove(name);
        }

        for (catalog, role) in &update.set_roles {
            merged.roles.insert(catalog.clone(), role.clone());
        }

        merged
    }

    /// Headers carried by statement submissions.
    ///
    /// `transient_prepared` is added to the prepared statements of this request
    /// only, without being recorded in the session.
    pub(crate) fn statement_headers(
        &self,
        names: &ProtocolHeaders,
        transient_prepared: Option<(&str, &str)>,
    ) -> Result<HeaderMap, TrinoError> {
        let mut headers = HeaderMap::new();

        insert(&mut headers, &names.source(), &self.source)?;
        insert(&mut headers, &names.client_capabilities(), CLIENT_CAPABILITIES)?;
        insert(
            &mut headers,
            &names.transaction_id(),
            self.transaction_id.as_deref().unwrap_or("NONE"),
        )?;

        let optional = [
            (names.catalog(), &self.catalog),
            (names.schema(), &self.schema),
            (names.path(), &self.path),
            (names.time_zone(), &self.time_zone),
            (names.language(), &self.locale),
            (names.trace_token(), &self.trace_token),
            (names.client_info(), &self.client_info),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                insert(&mut headers, &name, value)?;
            }
        }

        if !self.client_tags.is_empty() {
            let tags = self
                .client_tags
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(",");
            insert(&mut headers, &names.client_tags(), &tags)?;
        }

        for (name, value) in &self.properties {
            append(&mut headers, &names.session(), &format!("{name}={}", encode(value)))?;
        }
        for (name, value) in &self.resource_estimates {
            append(&mut headers, &names.resource_estimate(), &format!("{name}={value}"))?;
        }
        for (catalog, role) in &self.roles {
            append(
                &mut headers,
                &names.role(),
                &format!("{catalog}={}", encode(&role.to_string())),
            )?;
        }
        for (name, value) in &self.extra_credentials {
            append(
                &mut headers,
                &names.extra_credential(),
                &format!("{name}={}", encode(value)),
            )?;
        }

        let transient = transient_prepared.into_iter();
        let registered = self
            .prepared_statements
            .iter()
            .map(|(name, sql)| (name.as_str(), sql.as_str()));
        for (name, sql) in registered.chain(transient) {
            append(
                &mut headers,
                &names.prepared_statement(),
                &format!("{}={}", encode(name), encode(sql)),
            )?;
        }

        for (name, value) in &self.additional_headers {
            insert(&mut headers, name, value)?;
        }

        Ok(headers)
    }
}

/// Session changes pushed by the server, accumulated across the responses of
/// one query and applied once it finishes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub set_catalog: Option<String>,
    pub set_schema: Option<String>,
    pub set_path: Option<String>,
    pub set_authorization_user: Option<String>,
    pub reset_authorization_user: bool,
    pub set_session: BTreeMap<String, String>,
    pub clear_session: BTreeSet<String>,
    pub set_roles: BTreeMap<String, SelectedRole>,
    pub added_prepare: BTreeMap<String, String>,
    pub deallocated_prepare: BTreeSet<String>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self == &SessionUpdate::default()
    }

    /// Folds the session headers of one response into this update.
    pub(crate) fn absorb(&mut self, names: &ProtocolHeaders, headers: &HeaderMap) {
        if let Some(catalog) = first(headers, &names.set_catalog()) {
            self.set_catalog = Some(catalog);
        }
        if let Some(schema) = first(headers, &names.set_schema()) {
            self.set_schema = Some(schema);
        }
        if let Some(path) = first(headers, &names.set_path()) {
            self.set_path = Some(path);
        }
        if let Some(user) = first(headers, &names.set_authorization_user()) {
            self.set_authorization_user = Some(user);
        }
        if let Some(reset) = first(headers, &names.reset_authorization_user()) {
            self.reset_authorization_user = reset.trim().eq_ignore_ascii_case("true");
        }

        for (name, value) in pairs(headers, &names.set_session()) {
            self.clear_session.remove(&name);
            self.set_session.insert(name, value);
        }
        for value in all(headers, &names.clear_session()) {
            let name = decode(&value);
            self.set_session.remove(&name);
            self.clear_session.insert(name);
        }
        for (catalog, role) in pairs(headers, &names.set_role()) {
            match role.parse::<SelectedRole>() {
                Ok(role) => {
                    self.set_roles.insert(catalog, role);
                }
                Err(err) => tracing::warn!(catalog = %catalog, error = %err, "ignoring role header"),
            }
        }
        for (name, sql) in pairs(headers, &names.added_prepare()) {
            self.added_prepare.insert(name, sql);
        }
        for value in all(headers, &names.deallocated_prepare()) {
            let name = match value.split_once('=') {
                Some((name, _)) => decode(name),
                None => decode(&value),
            };
            self.deallocated_prepare.insert(name);
        }
    }
}

/// The session store shared by every query of one client.
///
/// Readers take a snapshot; a finished query replaces the whole value at once,
/// so no reader ever sees a half-applied update.
#[derive(Debug)]
pub struct ClientSession {
    properties: RwLock<Arc<SessionProperties>>,
}

impl ClientSession {
    pub fn new(properties: SessionProperties) -> Self {
        Self {
            properties: RwLock::new(Arc::new(properties)),
        }
    }

    pub fn properties(&self) -> Arc<SessionProperties> {
        self.properties
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Merges `update` into the current value and swaps it in.
    pub fn apply(&self, update: &SessionUpdate) -> Arc<SessionProperties> {
        let mut guard = self
            .properties
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let merged = Arc::new(guard.merge(update));
        *guard = merged.clone();
        merged
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode(value: &str) -> String {
    form_urlencoded::parse(value.as_bytes())
        .map(|(key, rest)| {
            if rest.is_empty() {
                key.into_owned()
            } else {
                format!("{key}={rest}")
            }
        })
        .next()
        .unwrap_or_default()
}

fn header_name(name: &str) -> Result<HeaderName, TrinoError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| TrinoError::Config(format!("invalid header name '{name}': {err}")))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, TrinoError> {
    HeaderValue::from_str(value)
        .map_err(|err| TrinoError::Config(format!("invalid value for header '{name}': {err}")))
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), TrinoError> {
    headers.insert(header_name(name)?, header_value(name, value)?);
    Ok(())
}

fn append(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), TrinoError> {
    headers.append(header_name(name)?, header_value(name, value)?);
    Ok(())
}

fn all(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_owned)
        .collect()
}

fn first(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Repeated `key=value` headers, both sides URL-decoded. Malformed entries are skipped.
fn pairs(headers: &HeaderMap, name: &str) -> Vec<(String, String)> {
    all(headers, name)
        .into_iter()
        .filter_map(|value| {
            let (key, value) = value.split_once('=')?;
            let key = decode(key.trim());
            (!key.is_empty()).then(|| (key, decode(value.trim())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use crate::{
        headers::ProtocolHeaders,
        session::{ClientSession, SelectedRole, SessionProperties, SessionUpdate},
    };

    fn session() -> SessionProperties {
        SessionProperties::new("http://localhost:8080")
            .expect("valid server")
            .with_user("alice")
    }

    fn response_headers(entries: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in entries {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn pushed_catalog_fills_unset_value_and_keeps_the_rest() {
        let base = session().with_schema("tiny");
        let update = SessionUpdate {
            set_catalog: Some("foo".to_owned()),
            ..SessionUpdate::default()
        };

        let merged = base.merge(&update);
        assert_eq!(merged.catalog.as_deref(), Some("foo"));
        assert_eq!(merged.schema.as_deref(), Some("tiny"));
        assert_eq!(merged.user.as_deref(), Some("alice"));
        assert_eq!(base.catalog, None, "merge must not touch the original");
    }

    #[test]
    fn authorization_user_reset_wins_over_set() {
        let mut base = session();
        base.authorization_user = Some("old".to_owned());

        let set = SessionUpdate {
            set_authorization_user: Some("new".to_owned()),
            ..SessionUpdate::default()
        };
        assert_eq!(base.merge(&set).authorization_user.as_deref(), Some("new"));

        let reset = SessionUpdate {
            set_authorization_user: Some("new".to_owned()),
            reset_authorization_user: true,
            ..SessionUpdate::default()
        };
        assert_eq!(base.merge(&reset).authorization_user, None);
        assert_eq!(
            base.merge(&SessionUpdate::default()).authorization_user.as_deref(),
            Some("old")
        );
    }

    #[test]
    fn prepared_statements_add_then_deallocate() {
        let mut base = session();
        base.prepared_statements
            .insert("existing".to_owned(), "SELECT 1".to_owned());

        let mut update = SessionUpdate::default();
        update
            .added_prepare
            .insert("existing".to_owned(), "SELECT 2".to_owned());
        update
            .added_prepare
            .insert("fresh".to_owned(), "SELECT 3".to_owned());
        update
            .added_prepare
            .insert("gone".to_owned(), "SELECT 4".to_owned());
        update.deallocated_prepare.insert("gone".to_owned());

        let merged = base.merge(&update);
        assert_eq!(merged.prepared_statements.get("existing").map(String::as_str), Some("SELECT 1"));
        assert_eq!(merged.prepared_statements.get("fresh").map(String::as_str), Some("SELECT 3"));
        assert!(!merged.prepared_statements.contains_key("gone"));
    }

    #[test]
    fn pushed_properties_override_existing() {
        let base = session()
            .with_property("join_distribution_type", "BROADCAST")
            .with_property("query_max_memory", "1GB");
        let mut update = SessionUpdate::default();
        update
            .set_session
            .insert("join_distribution_type".to_owned(), "PARTITIONED".to_owned());
        update.clear_session.insert("query_max_memory".to_owned());

        let merged = base.merge(&update);
        assert_eq!(
            merged.properties.get("join_distribution_type").map(String::as_str),
            Some("PARTITIONED")
        );
        assert!(!merged.properties.contains_key("query_max_memory"));
    }

    #[test]
    fn absorbs_response_headers_across_pages() {
        let names = ProtocolHeaders::default();
        let mut update = SessionUpdate::default();

        update.absorb(
            &names,
            &response_headers(&[
                ("x-trino-set-catalog", "memory"),
                ("x-trino-set-session", "spill_enabled=true"),
                ("x-trino-added-prepare", "my_stmt=SELECT+%3F"),
            ]),
        );
        update.absorb(
            &names,
            &response_headers(&[
                ("x-trino-set-schema", "default"),
                ("x-trino-set-session", "time_zone=Europe%2FBerlin"),
                ("x-trino-set-role", "hive=ROLE%7Badmin%7D"),
                ("x-trino-deallocated-prepare", "old_stmt"),
            ]),
        );

        assert_eq!(update.set_catalog.as_deref(), Some("memory"));
        assert_eq!(update.set_schema.as_deref(), Some("default"));
        assert_eq!(update.set_session.get("spill_enabled").map(String::as_str), Some("true"));
        assert_eq!(update.set_session.get("time_zone").map(String::as_str), Some("Europe/Berlin"));
        assert_eq!(update.added_prepare.get("my_stmt").map(String::as_str), Some("SELECT ?"));
        assert_eq!(update.set_roles.get("hive"), Some(&SelectedRole::Role("admin".to_owned())));
        assert!(update.deallocated_prepare.contains("old_stmt"));
    }

    #[test]
    fn statement_headers_encode_session() {
        let mut base = session()
            .with_catalog("tpch")
            .with_client_tag("b")
            .with_client_tag("a")
            .with_property("query_max_run_time", "1h 30m")
            .with_role("hive", SelectedRole::All)
            .with_header("X-Custom", "yes");
        base.prepared_statements
            .insert("q1".to_owned(), "SELECT ?".to_owned());

        let headers = base
            .statement_headers(&ProtocolHeaders::default(), Some(("tmp", "SELECT 1")))
            .expect("valid headers");

        assert_eq!(headers["x-trino-catalog"], "tpch");
        assert_eq!(headers["x-trino-source"], "trino-http");
        assert_eq!(headers["x-trino-client-tags"], "a,b");
        assert_eq!(headers["x-trino-client-capabilities"], "PARAMETRIC_DATETIME");
        assert_eq!(headers["x-trino-transaction-id"], "NONE");
        assert_eq!(headers["x-trino-session"], "query_max_run_time=1h+30m");
        assert_eq!(headers["x-trino-role"], "hive=ALL");
        assert_eq!(headers["x-custom"], "yes");
        let prepared: Vec<_> = headers
            .get_all("x-trino-prepared-statement")
            .iter()
            .map(|value| value.to_str().expect("ascii"))
            .collect();
        assert_eq!(prepared, vec!["q1=SELECT+%3F", "tmp=SELECT+1"]);
        assert!(headers.get("x-trino-schema").is_none());
    }

    #[test]
    fn selected_role_round_trips_through_text() {
        for role in [
            SelectedRole::Role("admin".to_owned()),
            SelectedRole::All,
            SelectedRole::None,
        ] {
            assert_eq!(role.to_string().parse::<SelectedRole>().expect("valid"), role);
        }
        assert!("ROLE{}".parse::<SelectedRole>().is_err());
    }

    #[test]
    fn client_session_swaps_whole_value() {
        let store = ClientSession::new(session());
        let before = store.properties();
        store.apply(&SessionUpdate {
            set_catalog: Some("memory".to_owned()),
            ..SessionUpdate::default()
        });
        assert_eq!(before.catalog, None);
        assert_eq!(store.properties().catalog.as_deref(), Some("memory"));
    }

    #[test]
    fn debug_redacts_extra_credentials() {
        let base = session().with_extra_credential("token", "super-secret");
        let debug = format!("{base:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn rejects_non_http_server() {
        assert!(SessionProperties::new("ftp://localhost").is_err());
        assert!(SessionProperties::new("not a url").is_err());
    }
}
