use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::*;
use diesel::query_dsl::methods::LoadQuery;
use diesel::sql_types::{Array, Integer, Text, Timestamptz};
use std::fmt;

use crate::hierarchy::filter::{BindArg, Fragment, SqlPiece};

/// Raw SQL assembled at runtime whose values travel as bind parameters.
///
/// Placeholders are numbered by diesel in the order the parameters are
/// walked, so a fragment can be spliced anywhere and its values still line
/// up with the text.
#[derive(Debug, Default)]
pub(crate) struct DynamicQuery {
    pieces: Vec<SqlPiece>,
    binds: Vec<BindArg>,
    clauses: usize,
}

impl DynamicQuery {
    pub(crate) fn new(sql: &str) -> Self {
        let mut query = Self::default();
        query.sql(sql);
        query
    }

    pub(crate) fn sql(&mut self, sql: &str) -> &mut Self {
        match self.pieces.last_mut() {
            Some(SqlPiece::Text(text)) => text.push_str(sql),
            _ => self.pieces.push(SqlPiece::Text(sql.to_string())),
        }
        self
    }

    pub(crate) fn bind(&mut self, arg: BindArg) -> &mut Self {
        self.pieces.push(SqlPiece::Param(self.binds.len()));
        self.binds.push(arg);
        self
    }

    /// Appends a fragment whose parameters index into `args`.
    pub(crate) fn fragment(&mut self, fragment: &Fragment, args: &[BindArg]) -> &mut Self {
        for piece in fragment.pieces() {
            match piece {
                SqlPiece::Text(text) => {
                    self.sql(text);
                }
                SqlPiece::Param(index) => {
                    if let Some(arg) = args.get(*index) {
                        self.bind(arg.clone());
                    }
                }
            }
        }
        self
    }

    /// Starts a `WHERE` clause on first use and continues it with `AND`
    /// afterwards.
    pub(crate) fn and_where(&mut self) -> &mut Self {
        self.sql(if self.clauses == 0 { " WHERE " } else { " AND " });
        self.clauses += 1;
        self
    }

    /// Adds each fragment as its own `WHERE`/`AND` clause.
    pub(crate) fn conditions(&mut self, fragments: &[Fragment], args: &[BindArg]) -> &mut Self {
        for fragment in fragments {
            self.and_where().fragment(fragment, args);
        }
        self
    }

    pub(crate) fn binds(&self) -> &[BindArg] {
        &self.binds
    }
}

impl fmt::Display for DynamicQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut placeholder = 0;
        for piece in &self.pieces {
            match piece {
                SqlPiece::Text(text) => f.write_str(text)?,
                SqlPiece::Param(_) => {
                    placeholder += 1;
                    write!(f, "${}", placeholder)?;
                }
            }
        }
        Ok(())
    }
}

impl QueryFragment<Pg> for DynamicQuery {
    fn walk_ast(&self, mut out: AstPass<Pg>) -> QueryResult<()> {
        out.unsafe_to_cache_prepared();
        for piece in &self.pieces {
            match piece {
                SqlPiece::Text(text) => out.push_sql(text),
                SqlPiece::Param(index) => match &self.binds[*index] {
                    BindArg::Int(value) => out.push_bind_param::<Integer, _>(value)?,
                    BindArg::Text(value) => out.push_bind_param::<Text, _>(value)?,
                    BindArg::Timestamp(value) => out.push_bind_param::<Timestamptz, _>(value)?,
                    BindArg::IntArray(value) => {
                        out.push_bind_param::<Array<Integer>, _>(value)?
                    }
                },
            }
        }
        Ok(())
    }
}

impl QueryId for DynamicQuery {
    type QueryId = ();

    const HAS_STATIC_QUERY_ID: bool = false;
}

impl<T> LoadQuery<PgConnection, T> for DynamicQuery
where
    T: diesel::deserialize::QueryableByName<Pg>,
{
    fn internal_load(self, conn: &PgConnection) -> QueryResult<Vec<T>> {
        conn.query_by_name(&self)
    }
}

impl<Conn> RunQueryDsl<Conn> for DynamicQuery {}
