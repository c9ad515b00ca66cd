//! Cursor-paginated connections built from overfetched windows.
//!
//! Stores are asked for `first + 1` rows at or after the `after` boundary
//! (one more when a boundary is given, since the boundary row itself comes
//! back). The builder strips the boundary echo, trims to `first`, and infers
//! the page flags from what was left over.

use std::sync::OnceLock;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::cursor::{self, CursorSource, DecodedCursor, SortKey};

/// Rows to request from the store for a page.
///
/// `None` means unbounded. With a cursor the window is `first + 2`: the
/// inclusive boundary row, `first` rows, and one spare to detect a next page.
pub fn window_size(first: Option<u32>, has_after: bool) -> Option<u32> {
    first.map(|n| n.saturating_add(1).saturating_add(u32::from(has_after)))
}

/// Collapse a store window into rows.
///
/// Bulk group-by queries return a single null placeholder for an input that
/// matched nothing; that is an empty window, not a one-row page.
pub fn normalize_window<N>(rows: Vec<Option<N>>) -> Vec<N> {
    rows.into_iter().flatten().collect()
}

/// A node plus its lazily computed cursor.
#[derive(Debug)]
pub struct Edge<N> {
    node: N,
    key: SortKey,
    cursor: OnceLock<String>,
}

impl<N: CursorSource> Edge<N> {
    fn new(node: N, key: SortKey) -> Self {
        Self {
            node,
            key,
            cursor: OnceLock::new(),
        }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn into_node(self) -> N {
        self.node
    }

    /// Encoded on first read.
    pub fn cursor(&self) -> &str {
        self.cursor
            .get_or_init(|| cursor::encode(self.key, &self.node))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

#[derive(Debug)]
pub struct Connection<N> {
    edges: Vec<Edge<N>>,
    page_info: PageInfo,
}

impl<N: CursorSource> Connection<N> {
    pub fn edges(&self) -> &[Edge<N>] {
        &self.edges
    }

    pub fn page_info(&self) -> PageInfo {
        self.page_info
    }

    pub fn start_cursor(&self) -> Option<&str> {
        self.edges.first().map(Edge::cursor)
    }

    pub fn end_cursor(&self) -> Option<&str> {
        self.edges.last().map(Edge::cursor)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.edges.iter().map(Edge::node)
    }

    pub fn into_nodes(self) -> Vec<N> {
        self.edges.into_iter().map(Edge::into_node).collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl<N: CursorSource + Serialize> Serialize for Connection<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Connection", 2)?;
        state.serialize_field("edges", &self.edges)?;
        state.serialize_field(
            "pageInfo",
            &WirePageInfo {
                has_next_page: self.page_info.has_next_page,
                has_previous_page: self.page_info.has_previous_page,
                start_cursor: self.start_cursor(),
                end_cursor: self.end_cursor(),
            },
        )?;
        state.end()
    }
}

impl<N: CursorSource + Serialize> Serialize for Edge<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Edge", 2)?;
        state.serialize_field("node", &self.node)?;
        state.serialize_field("cursor", self.cursor())?;
        state.end()
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePageInfo<'a> {
    has_next_page: bool,
    has_previous_page: bool,
    start_cursor: Option<&'a str>,
    end_cursor: Option<&'a str>,
}

/// Turns an ordered, overfetched window into a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    key: SortKey,
    first: Option<u32>,
    after: Option<Vec<String>>,
}

impl ConnectionBuilder {
    pub fn new(key: SortKey) -> Self {
        Self {
            key,
            first: None,
            after: None,
        }
    }

    #[must_use]
    pub fn first(mut self, first: Option<u32>) -> Self {
        self.first = first;
        self
    }

    #[must_use]
    pub fn after(mut self, after: Option<DecodedCursor>) -> Self {
        self.after = after.map(|c| c.values);
        self
    }

    pub fn build<N: CursorSource>(self, mut rows: Vec<N>) -> Connection<N> {
        let has_previous_page = self.after.is_some();

        // Only a row that still carries the boundary's key is the echo. If the
        // boundary row was deleted since the cursor was issued, the first row
        // is a real successor and must stay.
        if let Some(after) = &self.after {
            if rows.first().is_some_and(|r| self.is_boundary(r, after)) {
                rows.remove(0);
            }
        }

        let limit = self.first.map_or(usize::MAX, |n| n as usize);
        let has_next_page = rows.len() > limit;
        rows.truncate(limit);

        Connection {
            edges: rows.into_iter().map(|n| Edge::new(n, self.key)).collect(),
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
            },
        }
    }

    fn is_boundary(&self, row: &impl CursorSource, after: &[String]) -> bool {
        let values = self.key.values_of(row);
        values.len() == after.len()
            && values
                .iter()
                .zip(after)
                .all(|(v, a)| v.as_deref() == Some(a.as_str()))
    }
}
