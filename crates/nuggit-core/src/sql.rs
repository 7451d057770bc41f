//! SQL emission for result storage.
//!
//! Every stored view owns a [`Collection`]: one table whose columns are the
//! view's pipes, typed from each pipe's [`Point`]. Exchanged results are
//! inserted with [`insert_row`], and [`create_view`] emits the SQL view that
//! joins raw `TriggerResults` back onto `TriggerEvents`.
//!
//! Generated table and view names always match `^[a-z][a-z0-9_]*$`. Column
//! names are quoted.

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::NameDigest;
use crate::point::{Point, Scalar};
use crate::view::View;

/// Candidate rules for a hostname. URL patterns are checked by the caller.
pub const MATCH_RULES_SQL: &str = "\
SELECT p.Name, p.Digest, p.Spec, tr.AlwaysTrigger, tr.Hostname, tr.URLPattern
FROM Pipes p
JOIN PipeRules pr ON pr.PipeID = p.ID
JOIN TriggerRules tr ON pr.RuleID = tr.ID
WHERE NOT p.Disabled AND (tr.AlwaysTrigger OR tr.Hostname = ? OR tr.Hostname = '')
ORDER BY p.Name, p.Digest";

/// A positional SQL argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Null,
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// One exchanged value, as reported by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeResult {
    pub pipe: NameDigest,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionColumn {
    pub name: String,
    pub pipe: NameDigest,
    pub point: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// SQL-safe collection name.
    pub name: String,
    pub digest: String,
    pub columns: Vec<CollectionColumn>,
}

impl Collection {
    /// The collection backing `view`. `points` must hold the point of every
    /// column pipe.
    pub fn for_view(
        uuid: &Uuid,
        view: &View,
        digest: &str,
        points: &HashMap<NameDigest, Point>,
    ) -> Result<Self> {
        let name = match &view.alias {
            Some(alias) => alias.clone(),
            None => uuid_ident(uuid),
        };
        let columns = view
            .columns
            .iter()
            .map(|col| {
                let point = points.get(&col.pipe).copied().ok_or_else(|| {
                    Error::not_found(format!("view column pipe not found: {}", col.pipe))
                })?;
                Ok(CollectionColumn {
                    name: col.column_name(),
                    pipe: col.pipe.clone(),
                    point,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name,
            digest: digest.to_string(),
            columns,
        })
    }

    pub fn table_name(&self) -> String {
        table_name(&self.name, &self.digest)
    }

    pub fn covers(&self, pipe: &NameDigest) -> bool {
        self.columns.iter().any(|c| &c.pipe == pipe)
    }
}

/// A rendered statement and its positional args.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// Base SQL type for a point.
pub fn sql_type(point: &Point) -> &'static str {
    if point.repeated {
        return "TEXT";
    }
    match point.scalar {
        Scalar::Bytes => "BLOB",
        Scalar::String => "TEXT",
        Scalar::Bool => "BOOLEAN",
        Scalar::Int64 | Scalar::Uint64 => "INTEGER",
        Scalar::Float64 => "REAL",
    }
}

/// Column definition including checks and nullability.
pub fn column_def(name: &str, point: &Point) -> String {
    let col = quote_ident(name);
    let mut def = format!("{} {}", col, sql_type(point));
    if !point.nullable {
        def.push_str(" NOT NULL");
    }
    if point.repeated {
        def.push_str(&format!(
            " CHECK (json_valid({col}) AND json_type({col}) = 'array')",
            col = col
        ));
    } else if point.scalar == Scalar::Uint64 {
        def.push_str(&format!(" CHECK ({} >= 0)", col));
    }
    def
}

/// `collection_<name>__<digest>`, with `name` reduced to `[a-z0-9_]`.
pub fn table_name(name: &str, digest: &str) -> String {
    format!("collection_{}__{}", sanitize(name), sanitize(digest))
}

pub fn view_name(uuid: &Uuid) -> String {
    format!("view_{}", uuid_ident(uuid))
}

fn uuid_ident(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().replace('-', "_")
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn create_table(c: &Collection) -> String {
    let mut defs: Vec<String> = c
        .columns
        .iter()
        .map(|col| column_def(&col.name, &col.point))
        .collect();
    if !c.columns.is_empty() {
        let cols: Vec<String> = c.columns.iter().map(|col| quote_ident(&col.name)).collect();
        defs.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        c.table_name(),
        defs.join(", ")
    )
}

/// Insert one row into `c` from `results`.
///
/// Only columns with a result are listed. Returns `None` when the results
/// cover no column, or leave a non-nullable column without a value.
pub fn insert_row(c: &Collection, results: &[PipeResult]) -> Result<Option<Statement>> {
    let by_pipe: HashMap<&NameDigest, &Value> =
        results.iter().map(|r| (&r.pipe, &r.result)).collect();
    let mut cols = Vec::new();
    let mut args = Vec::new();
    for col in &c.columns {
        match by_pipe.get(&col.pipe) {
            Some(v) => {
                cols.push(quote_ident(&col.name));
                args.push(sql_arg(&col.point, v)?);
            }
            None if col.point.nullable => {}
            None => return Ok(None),
        }
    }
    if cols.is_empty() {
        return Ok(None);
    }
    let placeholders = vec!["?"; cols.len()].join(", ");
    Ok(Some(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            c.table_name(),
            cols.join(", "),
            placeholders
        ),
        args,
    }))
}

/// Convert a JSON result into the SQL argument for `point`.
///
/// Bytes travel as base64 strings; 64-bit integers may be JSON numbers or
/// decimal strings; repeated values are stored as JSON array text.
pub fn sql_arg(point: &Point, value: &Value) -> Result<SqlArg> {
    if value.is_null() {
        return if point.nullable {
            Ok(SqlArg::Null)
        } else {
            Err(Error::invalid(format!("null result for non-nullable {}", point)))
        };
    }
    if point.repeated {
        let items = value
            .as_array()
            .ok_or_else(|| Error::invalid(format!("expected array for {}", point)))?;
        for item in items {
            scalar_arg(point.scalar, item)?;
        }
        return Ok(SqlArg::Text(value.to_string()));
    }
    scalar_arg(point.scalar, value)
}

fn scalar_arg(scalar: Scalar, value: &Value) -> Result<SqlArg> {
    let mismatch = || Error::invalid(format!("expected {} result, got {}", scalar, value));
    match scalar {
        Scalar::Bytes => {
            let s = value.as_str().ok_or_else(mismatch)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| Error::invalid(format!("bytes result is not base64: {}", e)))?;
            Ok(SqlArg::Bytes(bytes))
        }
        Scalar::String => Ok(SqlArg::Text(value.as_str().ok_or_else(mismatch)?.to_string())),
        Scalar::Bool => Ok(SqlArg::Bool(value.as_bool().ok_or_else(mismatch)?)),
        Scalar::Int64 => {
            let n = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            };
            Ok(SqlArg::Int(n.ok_or_else(mismatch)?))
        }
        Scalar::Uint64 => {
            let n: Option<u64> = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            };
            let n = n.ok_or_else(mismatch)?;
            let n = i64::try_from(n)
                .map_err(|_| Error::invalid(format!("uint64 result out of range: {}", n)))?;
            Ok(SqlArg::Int(n))
        }
        Scalar::Float64 => {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            };
            Ok(SqlArg::Float(f.ok_or_else(mismatch)?))
        }
    }
}

/// Statements creating the SQL view for `view`, plus an alias view when the
/// view has one.
pub fn create_view(
    uuid: &Uuid,
    view: &View,
    points: &HashMap<NameDigest, Point>,
) -> Result<Vec<String>> {
    let name = view_name(uuid);
    let mut select = Vec::new();
    let mut joins = Vec::new();
    for (i, col) in view.columns.iter().enumerate() {
        let point = points
            .get(&col.pipe)
            .ok_or_else(|| Error::not_found(format!("view column pipe not found: {}", col.pipe)))?;
        let digest = col.pipe.digest().ok_or_else(|| {
            Error::invalid(format!("view column must be qualified: {}", col.pipe))
        })?;
        select.push(format!(
            "CAST(r{i}.Result AS {ty}) AS {alias}",
            i = i,
            ty = sql_type(point),
            alias = quote_ident(&col.column_name())
        ));
        joins.push(format!(
            "LEFT JOIN TriggerResults r{i} ON e.ID = r{i}.EventID AND r{i}.PipeID = \
             (SELECT p.ID FROM Pipes p WHERE p.Name = {name} AND p.Digest = {digest})",
            i = i,
            name = quote_literal(col.pipe.name()),
            digest = quote_literal(digest)
        ));
    }
    select.push("e.Timestamp".to_string());
    select.push("e.URL".to_string());

    let mut stmts = vec![format!(
        "CREATE VIEW IF NOT EXISTS {} AS SELECT\n    {}\nFROM TriggerEvents e\n{}\nORDER BY e.ID;",
        name,
        select.join(",\n    "),
        joins.join("\n")
    )];
    if let Some(alias) = &view.alias {
        if !is_sql_identifier(alias) {
            return Err(Error::invalid(format!("invalid view alias: {:?}", alias)));
        }
        stmts.push(format!(
            "CREATE VIEW {} AS SELECT * FROM {};",
            quote_ident(alias),
            name
        ));
    }
    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Column;

    fn nd(name: &str) -> NameDigest {
        NameDigest::with_digest(name, "d".repeat(40))
    }

    fn collection(points: &[(&str, Point)]) -> Collection {
        Collection {
            name: "c".into(),
            digest: "d".repeat(40),
            columns: points
                .iter()
                .map(|(n, p)| CollectionColumn {
                    name: n.to_string(),
                    pipe: nd(n),
                    point: *p,
                })
                .collect(),
        }
    }

    #[test]
    fn test_insert_single_string() {
        let c = collection(&[("p", Point::scalar(Scalar::String))]);
        let stmt = insert_row(
            &c,
            &[PipeResult {
                pipe: nd("p"),
                result: Value::from("hello"),
            }],
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            stmt.sql,
            format!(
                "INSERT INTO collection_c__{} (\"p\") VALUES (?) ON CONFLICT DO NOTHING",
                "d".repeat(40)
            )
        );
        assert_eq!(stmt.args, vec![SqlArg::Text("hello".into())]);
    }

    #[test]
    fn test_insert_skips_incomplete_rows() {
        let nullable = Point {
            nullable: true,
            ..Point::scalar(Scalar::Int64)
        };
        let c = collection(&[("a", Point::scalar(Scalar::String)), ("b", nullable)]);
        let only_b = [PipeResult {
            pipe: nd("b"),
            result: Value::from(3),
        }];
        assert!(insert_row(&c, &only_b).unwrap().is_none());

        let only_a = [PipeResult {
            pipe: nd("a"),
            result: Value::from("x"),
        }];
        let stmt = insert_row(&c, &only_a).unwrap().unwrap();
        assert!(stmt.sql.contains("(\"a\") VALUES (?)"));
        assert!(insert_row(&c, &[]).unwrap().is_none());
    }

    #[test]
    fn test_column_types() {
        assert_eq!(sql_type(&Point::scalar(Scalar::Bytes)), "BLOB");
        assert_eq!(sql_type(&Point::scalar(Scalar::Bool)), "BOOLEAN");
        assert_eq!(sql_type(&Point::scalar(Scalar::Float64)), "REAL");
        assert_eq!(sql_type(&Point::repeated(Scalar::Int64)), "TEXT");
        assert_eq!(
            column_def("n", &Point::scalar(Scalar::Uint64)),
            "\"n\" INTEGER NOT NULL CHECK (\"n\" >= 0)"
        );
        let nullable = Point {
            nullable: true,
            ..Point::scalar(Scalar::String)
        };
        assert_eq!(column_def("s", &nullable), "\"s\" TEXT");
        assert!(column_def("r", &Point::repeated(Scalar::String))
            .contains("json_type(\"r\") = 'array'"));
    }

    #[test]
    fn test_type_mapping_total() {
        for scalar in [
            Scalar::Bytes,
            Scalar::String,
            Scalar::Bool,
            Scalar::Int64,
            Scalar::Uint64,
            Scalar::Float64,
        ] {
            for nullable in [false, true] {
                for repeated in [false, true] {
                    let p = Point {
                        nullable,
                        repeated,
                        scalar,
                    };
                    assert!(!sql_type(&p).is_empty());
                    assert_eq!(column_def("x", &p).contains("NOT NULL"), !nullable);
                }
            }
        }
    }

    #[test]
    fn test_sql_args() {
        let s = Point::scalar(Scalar::String);
        assert!(sql_arg(&s, &Value::Null).is_err());
        let ns = Point { nullable: true, ..s };
        assert_eq!(sql_arg(&ns, &Value::Null).unwrap(), SqlArg::Null);

        let b = Point::scalar(Scalar::Bytes);
        assert_eq!(
            sql_arg(&b, &Value::from("aGk=")).unwrap(),
            SqlArg::Bytes(b"hi".to_vec())
        );
        assert!(sql_arg(&b, &Value::from("***")).is_err());

        let i = Point::scalar(Scalar::Int64);
        assert_eq!(sql_arg(&i, &Value::from(-4)).unwrap(), SqlArg::Int(-4));
        assert_eq!(sql_arg(&i, &Value::from("12")).unwrap(), SqlArg::Int(12));
        assert!(sql_arg(&i, &Value::from(true)).is_err());

        let u = Point::scalar(Scalar::Uint64);
        assert!(sql_arg(&u, &Value::from(-1)).is_err());
        assert!(sql_arg(&u, &Value::from(u64::MAX)).is_err());

        let r = Point::repeated(Scalar::String);
        assert_eq!(
            sql_arg(&r, &serde_json::json!(["a", "b"])).unwrap(),
            SqlArg::Text(r#"["a","b"]"#.into())
        );
        assert!(sql_arg(&r, &serde_json::json!(["a", 1])).is_err());
        assert!(sql_arg(&r, &Value::from("a")).is_err());
    }

    #[test]
    fn test_generated_names_are_identifiers() {
        for _ in 0..32 {
            let uuid = Uuid::new_v4();
            assert!(is_sql_identifier(&view_name(&uuid)));
            assert!(is_sql_identifier(&table_name(&uuid.to_string(), &"ab12".repeat(10))));
        }
        for name in ["foo-bar", "Weird Name", "a.b", "x"] {
            assert!(is_sql_identifier(&table_name(name, "0f")));
        }
        assert!(!is_sql_identifier("1abc"));
        assert!(!is_sql_identifier("a-b"));
    }

    #[test]
    fn test_create_view() {
        let uuid = Uuid::new_v4();
        let p = nd("foo-text");
        let view = View {
            alias: Some("texts".into()),
            columns: vec![Column::new(p.clone())],
        };
        let points = HashMap::from([(p.clone(), Point::scalar(Scalar::String))]);
        let stmts = create_view(&uuid, &view, &points).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with(&format!("CREATE VIEW IF NOT EXISTS {} AS SELECT", view_name(&uuid))));
        assert!(stmts[0].contains("CAST(r0.Result AS TEXT) AS \"foo_text\""));
        assert!(stmts[0].contains("p.Name = 'foo-text'"));
        assert!(stmts[0].contains("ORDER BY e.ID;"));
        assert_eq!(
            stmts[1],
            format!("CREATE VIEW \"texts\" AS SELECT * FROM {};", view_name(&uuid))
        );

        let unqualified = View {
            alias: None,
            columns: vec![Column::new(NameDigest::new("foo-text"))],
        };
        let points = HashMap::from([(NameDigest::new("foo-text"), Point::default())]);
        assert!(create_view(&uuid, &unqualified, &points).is_err());
    }

    #[test]
    fn test_collection_for_view() {
        let uuid = Uuid::new_v4();
        let p = nd("title");
        let view = View {
            alias: None,
            columns: vec![Column::new(p.clone())],
        };
        let points = HashMap::from([(p.clone(), Point::scalar(Scalar::String))]);
        let c = Collection::for_view(&uuid, &view, &"e".repeat(40), &points).unwrap();
        assert!(c.covers(&p));
        assert!(is_sql_identifier(&c.table_name()));
        assert!(create_table(&c).starts_with(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\"title\" TEXT NOT NULL",
            c.table_name()
        )));
        assert!(Collection::for_view(&uuid, &view, "e", &HashMap::new()).is_err());
    }
}
