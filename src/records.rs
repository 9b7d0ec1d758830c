use serde_json::Value as Json;

use crate::{
    codec,
    pages::Pages,
    state::QueryState,
    types::{Column, Page, QueryStatus},
    value::{FromValue, Value},
    Result, TrinoError,
};

/// Row-by-row view over a query's pages.
///
/// ```no_run
/// # async fn run(client: &trino_http::TrinoClient) -> trino_http::Result<()> {
/// let mut records = client.query("SELECT name, age FROM people").await?;
/// while records.next().await? {
///     let name: String = records.get(0)?;
///     let age: Option<i64> = records.get(1)?;
///     println!("{name} {age:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Records {
    pages: Pages,
    page: Option<Page>,
    row: usize,
    done: bool,
    closed: bool,
}

impl Records {
    pub(crate) fn new(pages: Pages) -> Self {
        Self {
            pages,
            page: None,
            row: 0,
            done: false,
            closed: false,
        }
    }

    /// Moves to the next row. Returns `false` once every row has been read.
    pub async fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(TrinoError::Contract(
                "cannot advance a closed record stream".to_owned(),
            ));
        }
        if self.done {
            return Ok(false);
        }

        if let Some(page) = &self.page {
            if self.row + 1 < page.rows.len() {
                self.row += 1;
                return Ok(true);
            }
        }

        match self.pages.next_page().await? {
            Some(page) if !page.has_rows() => Err(TrinoError::Contract(
                "page stream yielded a page without rows".to_owned(),
            )),
            Some(page) => {
                self.page = Some(page);
                self.row = 0;
                Ok(true)
            }
            None => {
                self.page = None;
                self.done = true;
                Ok(false)
            }
        }
    }

    /// Undecoded cells of the current row.
    pub fn row(&self) -> Option<&[Json]> {
        self.page
            .as_ref()
            .and_then(|page| page.rows.get(self.row))
            .map(Vec::as_slice)
    }

    /// Decodes cell `index` of the current row.
    pub fn value(&self, index: usize) -> Result<Value> {
        let (cell, column) = self.cell(index)?;
        codec::convert(cell, &column.column_type)
    }

    /// Decodes cell `index` into `T`.
    ///
    /// A SQL `NULL` is only accepted when `T` can represent it, such as
    /// `Option<_>` or [`Value`]; otherwise [`TrinoError::UnexpectedNull`] is
    /// returned.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let (cell, column) = self.cell(index)?;
        let value = codec::convert(cell, &column.column_type)?;
        if value.is_null() {
            return T::from_null().ok_or_else(|| TrinoError::UnexpectedNull {
                column: index,
                column_type: column.column_type.clone(),
            });
        }
        T::from_value(value)
    }

    /// Like [`Records::get`], but first checks that the column's base type is
    /// one of `accepted`, e.g. `&["varchar", "char"]`.
    pub fn get_checked<T: FromValue>(&self, index: usize, accepted: &[&str]) -> Result<T> {
        let column = self.column(index)?;
        let (base, _) = codec::split_type(&column.column_type);
        let matches = accepted
            .iter()
            .any(|expected| codec::split_type(expected).0 == base);
        if !matches {
            return Err(TrinoError::TypeMismatch {
                actual: column.column_type.clone(),
                expected: accepted.join(" or "),
            });
        }
        self.get(index)
    }

    /// The result schema, waiting for the server to announce it.
    pub async fn columns(&self) -> Result<Option<Vec<Column>>> {
        self.pages.columns().await
    }

    /// Whether the query produced at least one row.
    pub async fn has_data(&self) -> Result<bool> {
        self.pages.has_data().await
    }

    /// Decodes every remaining row.
    pub async fn read_to_end(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while self.next().await? {
            let width = self.row().map_or(0, <[Json]>::len);
            let row = (0..width)
                .map(|index| self.value(index))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Stops reading and cancels the query if it is still running.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page = None;
        if self.pages.state() == QueryState::Running {
            self.pages.cancel().await?;
        }
        Ok(())
    }

    pub fn state(&self) -> QueryState {
        self.pages.state()
    }

    pub fn query_id(&self) -> Option<String> {
        self.pages.query_id()
    }

    pub fn last_status(&self) -> Option<QueryStatus> {
        self.pages.last_status()
    }

    /// The underlying page stream.
    pub fn pages(&self) -> &Pages {
        &self.pages
    }

    fn column(&self, index: usize) -> Result<&Column> {
        let columns = self
            .page
            .as_ref()
            .and_then(|page| page.columns.as_deref())
            .or_else(|| self.pages.known_columns())
            .ok_or_else(|| TrinoError::Contract("result schema is not known yet".to_owned()))?;
        columns
            .get(index)
            .ok_or(TrinoError::ColumnIndexOutOfBounds {
                index,
                len: columns.len(),
            })
    }

    fn cell(&self, index: usize) -> Result<(&Json, &Column)> {
        let row = self
            .row()
            .ok_or_else(|| TrinoError::Contract("no current row, call next() first".to_owned()))?;
        let column = self.column(index)?;
        let cell = row.get(index).ok_or(TrinoError::ColumnIndexOutOfBounds {
            index,
            len: row.len(),
        })?;
        Ok((cell, column))
    }
}
