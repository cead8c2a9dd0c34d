//! Pagination over repeated `send` calls.
//!
//! Every strategy yields a lazy, finite, non-restartable sequence of pages.
//! `max_items` is a hard ceiling on the total number of items yielded, and
//! an empty page always ends the sequence.
//!
//! | Strategy | Position | Stops when |
//! |----------|----------|------------|
//! | [`CursorPagination`] | opaque cursor | no cursor or no items |
//! | [`OffsetPagination`] | numeric offset | a short or empty page |
//! | [`SingleShotPagination`] | local buffer | buffer drained |

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectorError;
use crate::request::RequestSpec;
use crate::transport::Transport;

pub const DEFAULT_OFFSET_PAGE_SIZE: usize = 100;

/// Pulls the item array out of a response body.
pub type ItemsExtractor = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;
/// Pulls the next cursor out of a response body.
pub type CursorExtractor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// The body itself when it is an array, otherwise its `items` array.
pub fn default_items(body: &Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items.clone(),
        _ => body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

/// `next_cursor` or `nextCursor`; an empty string means no further page.
pub fn default_next_cursor(body: &Value) -> Option<String> {
    ["next_cursor", "nextCursor"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_owned)
}

#[derive(Clone)]
pub struct CursorPagination {
    cursor_param: String,
    limit_param: String,
    items: ItemsExtractor,
    next_cursor: CursorExtractor,
}

impl Default for CursorPagination {
    fn default() -> Self {
        Self {
            cursor_param: String::from("cursor"),
            limit_param: String::from("limit"),
            items: Arc::new(default_items),
            next_cursor: Arc::new(default_next_cursor),
        }
    }
}

impl CursorPagination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor_param(mut self, name: impl Into<String>) -> Self {
        self.cursor_param = name.into();
        self
    }

    /// Query parameter carrying `page_size`.
    pub fn limit_param(mut self, name: impl Into<String>) -> Self {
        self.limit_param = name.into();
        self
    }

    pub fn items_with(mut self, f: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.items = Arc::new(f);
        self
    }

    pub fn next_cursor_with(
        mut self,
        f: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.next_cursor = Arc::new(f);
        self
    }
}

#[derive(Clone)]
pub struct OffsetPagination {
    offset_param: String,
    limit_param: String,
    items: ItemsExtractor,
}

impl Default for OffsetPagination {
    fn default() -> Self {
        Self {
            offset_param: String::from("offset"),
            limit_param: String::from("limit"),
            items: Arc::new(default_items),
        }
    }
}

impl OffsetPagination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset_param(mut self, name: impl Into<String>) -> Self {
        self.offset_param = name.into();
        self
    }

    pub fn limit_param(mut self, name: impl Into<String>) -> Self {
        self.limit_param = name.into();
        self
    }

    pub fn items_with(mut self, f: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.items = Arc::new(f);
        self
    }
}

/// One request, then client-side chunking of the full result.
#[derive(Clone)]
pub struct SingleShotPagination {
    items: ItemsExtractor,
}

impl Default for SingleShotPagination {
    fn default() -> Self {
        Self {
            items: Arc::new(default_items),
        }
    }
}

impl SingleShotPagination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items_with(mut self, f: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
        self.items = Arc::new(f);
        self
    }
}

#[derive(Clone)]
pub enum PaginationStrategy {
    Cursor(CursorPagination),
    Offset(OffsetPagination),
    SingleShot(SingleShotPagination),
}

impl PaginationStrategy {
    pub fn cursor() -> Self {
        Self::Cursor(CursorPagination::default())
    }

    pub fn offset() -> Self {
        Self::Offset(OffsetPagination::default())
    }

    pub fn single_shot() -> Self {
        Self::SingleShot(SingleShotPagination::default())
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cursor(_) => "cursor",
            Self::Offset(_) => "offset",
            Self::SingleShot(_) => "singleShot",
        }
    }
}

impl Debug for PaginationStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PaginationStrategy").field(&self.name()).finish()
    }
}

/// Options every strategy recognizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaginateOptions {
    pub page_size: Option<usize>,
    /// Hard ceiling on items yielded across all pages.
    pub max_items: Option<usize>,
}

impl PaginateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

enum Position {
    Start,
    Cursor(String),
    Offset(usize),
    Buffered(VecDeque<Value>),
    Done,
}

/// Lazy page sequence produced by `paginate`.
pub struct Pages<T> {
    transport: Arc<Transport>,
    spec: RequestSpec,
    strategy: PaginationStrategy,
    options: PaginateOptions,
    position: Position,
    yielded: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Pages<T> {
    pub(crate) fn new(
        transport: Arc<Transport>,
        spec: RequestSpec,
        strategy: PaginationStrategy,
        options: PaginateOptions,
    ) -> Self {
        Self {
            transport,
            spec,
            strategy,
            options,
            position: Position::Start,
            yielded: 0,
            _item: PhantomData,
        }
    }

    /// Items yielded so far.
    pub const fn yielded(&self) -> usize {
        self.yielded
    }

    /// Fetches the next page, or `None` once the sequence has ended.
    ///
    /// A failed fetch ends the sequence after returning the error.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, ConnectorError> {
        if self.remaining() == Some(0) {
            self.position = Position::Done;
        }
        if matches!(self.position, Position::Done) {
            return Ok(None);
        }

        let strategy = self.strategy.clone();
        let fetched = match &strategy {
            PaginationStrategy::Cursor(cursor) => self.cursor_page(cursor).await,
            PaginationStrategy::Offset(offset) => self.offset_page(offset).await,
            PaginationStrategy::SingleShot(single) => self.single_shot_page(single).await,
        };
        let mut items = match fetched {
            Ok(items) => items,
            Err(error) => {
                self.position = Position::Done;
                return Err(error);
            }
        };

        if let Some(remaining) = self.remaining() {
            if items.len() >= remaining {
                items.truncate(remaining);
                self.position = Position::Done;
            }
        }
        if items.is_empty() {
            self.position = Position::Done;
            return Ok(None);
        }

        let count = items.len();
        let page: Vec<T> = match serde_json::from_value(Value::Array(items)) {
            Ok(page) => page,
            Err(error) => {
                self.position = Position::Done;
                let error = ConnectorError::parsing(format!(
                    "page items do not match the expected shape: {error}"
                ));
                return Err(self.transport.report_failure(&self.spec, error).await);
            }
        };

        self.yielded += count;
        tracing::debug!(
            strategy = self.strategy.name(),
            operation = self.spec.operation.as_deref().unwrap_or("-"),
            page_items = count,
            total_items = self.yielded,
            "fetched page"
        );
        Ok(Some(page))
    }

    /// Adapts the sequence into a [`Stream`] of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<T>, ConnectorError>> {
        futures::stream::unfold(self, |mut pages| async move {
            match pages.next_page().await {
                Ok(Some(page)) => Some((Ok(page), pages)),
                Ok(None) => None,
                Err(error) => Some((Err(error), pages)),
            }
        })
    }

    /// Drains every page into one vector.
    pub async fn collect_items(mut self) -> Result<Vec<T>, ConnectorError> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page);
        }
        Ok(items)
    }

    fn remaining(&self) -> Option<usize> {
        self.options
            .max_items
            .map(|max_items| max_items.saturating_sub(self.yielded))
    }

    async fn cursor_page(
        &mut self,
        pagination: &CursorPagination,
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut spec = self.spec.clone();
        if let Position::Cursor(cursor) = &self.position {
            spec.set_query(&pagination.cursor_param, cursor);
        }
        if let Some(page_size) = self.options.page_size {
            let size = self.remaining().map_or(page_size, |left| left.min(page_size));
            spec.set_query(&pagination.limit_param, size);
        }

        let envelope = self.transport.execute(&spec).await?;
        let items = (pagination.items)(&envelope.data);
        self.position = match (pagination.next_cursor)(&envelope.data) {
            Some(cursor) if !items.is_empty() => Position::Cursor(cursor),
            _ => Position::Done,
        };
        Ok(items)
    }

    async fn offset_page(
        &mut self,
        pagination: &OffsetPagination,
    ) -> Result<Vec<Value>, ConnectorError> {
        let offset = match self.position {
            Position::Offset(offset) => offset,
            _ => 0,
        };
        let limit = self
            .options
            .page_size
            .unwrap_or(DEFAULT_OFFSET_PAGE_SIZE)
            .max(1);

        let mut spec = self.spec.clone();
        spec.set_query(&pagination.limit_param, limit);
        spec.set_query(&pagination.offset_param, offset);

        let envelope = self.transport.execute(&spec).await?;
        let items = (pagination.items)(&envelope.data);
        self.position = if items.len() < limit {
            Position::Done
        } else {
            Position::Offset(offset + items.len())
        };
        Ok(items)
    }

    async fn single_shot_page(
        &mut self,
        pagination: &SingleShotPagination,
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut buffer = match std::mem::replace(&mut self.position, Position::Done) {
            Position::Buffered(buffer) => buffer,
            _ => {
                let envelope = self.transport.execute(&self.spec).await?;
                VecDeque::from((pagination.items)(&envelope.data))
            }
        };

        let chunk_size = self
            .options
            .page_size
            .unwrap_or(buffer.len())
            .max(1)
            .min(buffer.len());
        let chunk: Vec<Value> = buffer.drain(..chunk_size).collect();
        if !buffer.is_empty() {
            self.position = Position::Buffered(buffer);
        }
        Ok(chunk)
    }
}
