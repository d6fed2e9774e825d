//! SQL text generation from table models.
//!
//! Column lists follow field declaration order and every bound value uses a
//! named placeholder, so generated text can be prepared once and reused with
//! different parameters.


use crate::error::Result;
use crate::field::Field;
use crate::table::{IndexDefinition, Table};
use crate::value::AppValue;

/// SQL statement text plus its placeholders in binding order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub placeholders: Vec<String>,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            placeholders: Vec::new(),
        }
    }

    pub fn with_placeholders(mut self, placeholders: Vec<String>) -> Self {
        self.placeholders = placeholders;
        self
    }
}

/// Query operators for filtering rows
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(AppValue),
    NotEqual(AppValue),
    GreaterThan(AppValue),
    GreaterThanOrEqual(AppValue),
    LessThan(AppValue),
    LessThanOrEqual(AppValue),
    Like(String),
    In(Vec<AppValue>),
    IsNull,
    IsNotNull,
}

/// Row filter, ordering and paging for select, count and delete.
///
/// Conditions name columns and are joined with `AND`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Query {
    pub conditions: Vec<(String, QueryOperator)>,
    pub order_by: Vec<(String, bool)>, // (column, is_ascending)
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, column: &str, op: QueryOperator) -> Self {
        self.conditions.push((column.to_string(), op));
        self
    }

    pub fn with_order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order_by.push((column.to_string(), ascending));
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

// SQLite keywords; identifiers matching one of these are quoted
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS",
    "ASC", "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE",
    "CAST", "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE",
    "CROSS", "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE",
    "DEFAULT", "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP",
    "EACH", "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN",
    "FAIL", "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED",
    "GLOB", "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX",
    "INDEXED", "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL",
    "JOIN", "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO",
    "NOT", "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER",
    "OTHERS", "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY",
    "RAISE", "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME",
    "REPLACE", "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT",
    "SELECT", "SET", "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION",
    "TRIGGER", "UNBOUNDED", "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW",
    "VIRTUAL", "WHEN", "WHERE", "WINDOW", "WITH", "WITHOUT",
];

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Emits `name` bare, or double-quoted when it is a keyword or not a plain
/// identifier
pub fn quote_identifier(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    if is_bare_identifier(name) && !KEYWORDS.contains(&upper.as_str()) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Named placeholder for a column: `:` followed by the column name with
/// characters outside `[A-Za-z0-9_]` replaced by `_`
pub fn placeholder(column: &str) -> String {
    let mut out = String::with_capacity(column.len() + 1);
    out.push(':');
    out.extend(
        column
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }),
    );
    out
}

/// Placeholder for the `value`-th value of the `condition`-th query condition
pub fn condition_placeholder(condition: usize, value: usize) -> String {
    format!(":w{condition}_{value}")
}

fn column_list<'a>(fields: impl IntoIterator<Item = &'a Field>) -> String {
    fields
        .into_iter()
        .map(Field::quoted_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` with the primary key and one clause per foreign key
/// constraint
pub fn create_table(table: &Table) -> String {
    let identity: Vec<&Field> = table.identity_fields().collect();
    let autoincrement = table.autoincrement_field().map(|f| f.name.as_str());
    if table.auto_increment && autoincrement.is_none() {
        tracing::warn!(
            table = %table.name(),
            "autoincrement requires a single INTEGER identity column; ignored"
        );
    }

    let mut definitions: Vec<String> = table
        .fields()
        .map(|field| {
            let mut def = format!("{} {}", field.quoted_name(), field.dbtype);
            if identity.len() == 1 && field.is_identity {
                def.push_str(" PRIMARY KEY");
                if autoincrement == Some(field.name.as_str()) {
                    def.push_str(" AUTOINCREMENT");
                }
            }
            def
        })
        .collect();

    if identity.len() > 1 {
        definitions.push(format!("PRIMARY KEY ({})", column_list(identity)));
    }

    for fk in table.foreign_key_constraints() {
        definitions.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_identifier(&fk.name),
            quoted_list(&fk.columns),
            quote_identifier(&fk.foreign_table),
            quoted_list(&fk.foreign_columns)
        ));
    }

    format!("CREATE TABLE {} ({})", table.quoted_name(), definitions.join(", "))
}

pub fn drop_table(table: &Table) -> String {
    format!("DROP TABLE {}", table.quoted_name())
}

pub fn alter_table_add_column(table: &Table, field: &Field) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table.quoted_name(),
        field.quoted_name(),
        field.dbtype
    )
}

pub fn create_index(table: &Table, index: &IndexDefinition) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_identifier(&index.name),
        table.quoted_name(),
        quoted_list(&index.columns)
    )
}

pub fn drop_index(index: &IndexDefinition) -> String {
    format!("DROP INDEX {}", quote_identifier(&index.name))
}

/// `INSERT` of the given columns; no columns inserts a row of defaults
pub fn insert(table: &Table, columns: &[&Field]) -> SqlQuery {
    if columns.is_empty() {
        return SqlQuery::new(&format!("INSERT INTO {} DEFAULT VALUES", table.quoted_name()));
    }
    let placeholders: Vec<String> = columns.iter().map(|f| f.placeholder()).collect();
    let statement = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.quoted_name(),
        column_list(columns.iter().copied()),
        placeholders.join(", ")
    );
    SqlQuery::new(&statement).with_placeholders(placeholders)
}

fn identity_clause(table: &Table, placeholders: &mut Vec<String>) -> String {
    table
        .identity_fields()
        .map(|f| {
            placeholders.push(f.placeholder());
            format!("{} = {}", f.quoted_name(), f.placeholder())
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `UPDATE` of the given non-identity columns of the row matching the
/// identity columns
pub fn update_by_id(table: &Table, columns: &[&Field]) -> SqlQuery {
    let mut placeholders = Vec::new();
    let mut assignments: Vec<String> = columns
        .iter()
        .filter(|f| !f.is_identity)
        .map(|f| {
            placeholders.push(f.placeholder());
            format!("{} = {}", f.quoted_name(), f.placeholder())
        })
        .collect();
    if assignments.is_empty() {
        // nothing to change; keep the statement valid
        assignments = table
            .identity_fields()
            .map(|f| format!("{} = {}", f.quoted_name(), f.quoted_name()))
            .collect();
    }
    let condition = identity_clause(table, &mut placeholders);
    let statement = format!(
        "UPDATE {} SET {} WHERE {}",
        table.quoted_name(),
        assignments.join(", "),
        condition
    );
    SqlQuery::new(&statement).with_placeholders(placeholders)
}

pub fn delete_by_id(table: &Table) -> SqlQuery {
    let mut placeholders = Vec::new();
    let condition = identity_clause(table, &mut placeholders);
    let statement = format!("DELETE FROM {} WHERE {}", table.quoted_name(), condition);
    SqlQuery::new(&statement).with_placeholders(placeholders)
}

pub fn select_by_id(table: &Table) -> SqlQuery {
    let mut placeholders = Vec::new();
    let condition = identity_clause(table, &mut placeholders);
    let statement = format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(table.fields()),
        table.quoted_name(),
        condition
    );
    SqlQuery::new(&statement).with_placeholders(placeholders)
}

fn where_clause(table: &Table, query: &Query, placeholders: &mut Vec<String>) -> Result<String> {
    if query.conditions.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(query.conditions.len());
    for (i, (column, op)) in query.conditions.iter().enumerate() {
        let column = table.get_table_field(column)?.quoted_name();
        let mut bind = |j: usize| {
            let p = condition_placeholder(i, j);
            placeholders.push(p.clone());
            p
        };
        let term = match op {
            QueryOperator::Equal(_) => format!("{column} = {}", bind(0)),
            QueryOperator::NotEqual(_) => format!("{column} <> {}", bind(0)),
            QueryOperator::GreaterThan(_) => format!("{column} > {}", bind(0)),
            QueryOperator::GreaterThanOrEqual(_) => format!("{column} >= {}", bind(0)),
            QueryOperator::LessThan(_) => format!("{column} < {}", bind(0)),
            QueryOperator::LessThanOrEqual(_) => format!("{column} <= {}", bind(0)),
            QueryOperator::Like(_) => format!("{column} LIKE {}", bind(0)),
            // an empty IN list matches nothing
            QueryOperator::In(values) if values.is_empty() => "0".to_string(),
            QueryOperator::In(values) => {
                let list: Vec<String> = (0..values.len()).map(&mut bind).collect();
                format!("{column} IN ({})", list.join(", "))
            }
            QueryOperator::IsNull => format!("{column} IS NULL"),
            QueryOperator::IsNotNull => format!("{column} IS NOT NULL"),
        };
        terms.push(term);
    }
    Ok(format!(" WHERE {}", terms.join(" AND ")))
}

fn tail_clause(table: &Table, query: &Query) -> Result<String> {
    let mut out = String::new();
    if !query.order_by.is_empty() {
        let mut terms = Vec::with_capacity(query.order_by.len());
        for (column, ascending) in &query.order_by {
            let column = table.get_table_field(column)?.quoted_name();
            terms.push(format!("{column} {}", if *ascending { "ASC" } else { "DESC" }));
        }
        out.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => out.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => out.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => out.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
    Ok(out)
}

/// `SELECT` of all mapped columns filtered, ordered and paged by `query`.
///
/// Fails with `FieldNotFound` if the query names an unmapped column.
pub fn select(table: &Table, query: &Query) -> Result<SqlQuery> {
    let mut placeholders = Vec::new();
    let filter = where_clause(table, query, &mut placeholders)?;
    let statement = format!(
        "SELECT {} FROM {}{}{}",
        column_list(table.fields()),
        table.quoted_name(),
        filter,
        tail_clause(table, query)?
    );
    Ok(SqlQuery::new(&statement).with_placeholders(placeholders))
}

/// `SELECT COUNT(*)` of rows matching the conditions of `query`
pub fn count(table: &Table, query: &Query) -> Result<SqlQuery> {
    let mut placeholders = Vec::new();
    let filter = where_clause(table, query, &mut placeholders)?;
    let statement = format!("SELECT COUNT(*) AS COUNT FROM {}{}", table.quoted_name(), filter);
    Ok(SqlQuery::new(&statement).with_placeholders(placeholders))
}

/// `DELETE` of rows matching the conditions of `query`.
///
/// When the query is ordered or paged, the affected rows are picked by a
/// rowid subselect carrying the same `ORDER BY`/`LIMIT`/`OFFSET`.
pub fn delete(table: &Table, query: &Query) -> Result<SqlQuery> {
    let mut placeholders = Vec::new();
    let filter = where_clause(table, query, &mut placeholders)?;
    let tail = tail_clause(table, query)?;
    let name = table.quoted_name();
    let statement = if tail.is_empty() {
        format!("DELETE FROM {name}{filter}")
    } else {
        format!("DELETE FROM {name} WHERE rowid IN (SELECT rowid FROM {name}{filter}{tail})")
    };
    Ok(SqlQuery::new(&statement).with_placeholders(placeholders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::field::FieldReference;

    fn parent() -> Table {
        let mut table = Table::new("PARENTTABLE");
        table
            .add_table_field(
                Field::new("id")
                    .with_name("ID")
                    .with_dbtype("INTEGER NOT NULL")
                    .with_identity(true),
            )
            .unwrap();
        table
            .add_table_field(Field::new("name").with_name("NAME").with_dbtype("TEXT"))
            .unwrap();
        table
    }

    fn child() -> Table {
        let mut table = Table::new("CHILDTABLE").with_auto_increment(true);
        table
            .add_table_field(
                Field::new("id")
                    .with_name("ID")
                    .with_dbtype("INTEGER NOT NULL")
                    .with_identity(true),
            )
            .unwrap();
        table
            .add_table_field(Field::new("name").with_name("NAME").with_dbtype("TEXT"))
            .unwrap();
        let mut fk = Field::new("parentId")
            .with_name("PARENT_ID")
            .with_dbtype("INTEGER NOT NULL");
        fk.add_foreign_key_field("PARENT", FieldReference::new("PARENTTABLE", "ID"))
            .unwrap();
        table.add_table_field(fk).unwrap();
        table
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("NAME"), "NAME");
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("my col"), "\"my col\"");
        assert_eq!(quote_identifier("1st"), "\"1st\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(placeholder("PARENT_ID"), ":PARENT_ID");
        assert_eq!(placeholder("my col"), ":my_col");
    }

    #[test]
    fn test_create_table() {
        assert_eq!(
            create_table(&parent()),
            "CREATE TABLE PARENTTABLE (ID INTEGER NOT NULL PRIMARY KEY, NAME TEXT)"
        );
        assert_eq!(
            create_table(&child()),
            "CREATE TABLE CHILDTABLE (ID INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             NAME TEXT, PARENT_ID INTEGER NOT NULL, \
             CONSTRAINT PARENT FOREIGN KEY (PARENT_ID) REFERENCES PARENTTABLE (ID))"
        );
    }

    #[test]
    fn test_create_table_composite_key() {
        let mut table = Table::new("LINK");
        table
            .add_table_field(Field::new("a").with_name("A").with_identity(true))
            .unwrap();
        table
            .add_table_field(Field::new("b").with_name("B").with_identity(true))
            .unwrap();
        assert_eq!(
            create_table(&table),
            "CREATE TABLE LINK (A TEXT, B TEXT, PRIMARY KEY (A, B))"
        );
    }

    #[test]
    fn test_ddl() {
        let table = parent();
        let field = Field::new("dyn").with_name("TESTADDCOL").with_dbtype("INTEGER");
        assert_eq!(
            alter_table_add_column(&table, &field),
            "ALTER TABLE PARENTTABLE ADD COLUMN TESTADDCOL INTEGER"
        );
        assert_eq!(drop_table(&table), "DROP TABLE PARENTTABLE");
        let index = IndexDefinition {
            name: "IDX".to_string(),
            columns: vec!["NAME".to_string()],
            unique: true,
        };
        assert_eq!(
            create_index(&table, &index),
            "CREATE UNIQUE INDEX IDX ON PARENTTABLE (NAME)"
        );
        assert_eq!(drop_index(&index), "DROP INDEX IDX");
    }

    #[test]
    fn test_dml() {
        let table = child();
        let columns: Vec<&Field> = table.fields().skip(1).collect();
        let insert = insert(&table, &columns);
        assert_eq!(
            insert.statement,
            "INSERT INTO CHILDTABLE (NAME, PARENT_ID) VALUES (:NAME, :PARENT_ID)"
        );
        assert_eq!(insert.placeholders, [":NAME", ":PARENT_ID"]);

        let all: Vec<&Field> = table.fields().collect();
        let update = update_by_id(&table, &all);
        assert_eq!(
            update.statement,
            "UPDATE CHILDTABLE SET NAME = :NAME, PARENT_ID = :PARENT_ID WHERE ID = :ID"
        );
        assert_eq!(update.placeholders, [":NAME", ":PARENT_ID", ":ID"]);

        assert_eq!(
            select_by_id(&table).statement,
            "SELECT ID, NAME, PARENT_ID FROM CHILDTABLE WHERE ID = :ID"
        );
        assert_eq!(delete_by_id(&table).statement, "DELETE FROM CHILDTABLE WHERE ID = :ID");
        assert_eq!(
            super::insert(&table, &[]).statement,
            "INSERT INTO CHILDTABLE DEFAULT VALUES"
        );
    }

    #[test]
    fn test_select_with_query() {
        let table = child();
        let query = Query::new()
            .with_condition("PARENT_ID", QueryOperator::Equal(AppValue::Integer(1)))
            .with_condition(
                "ID",
                QueryOperator::In(vec![AppValue::Integer(1), AppValue::Integer(2)]),
            )
            .with_condition("NAME", QueryOperator::IsNotNull)
            .with_order_by("NAME", false)
            .with_limit(10)
            .with_offset(5);
        let sql = select(&table, &query).unwrap();
        assert_eq!(
            sql.statement,
            "SELECT ID, NAME, PARENT_ID FROM CHILDTABLE WHERE PARENT_ID = :w0_0 \
             AND ID IN (:w1_0, :w1_1) AND NAME IS NOT NULL ORDER BY NAME DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(sql.placeholders, [":w0_0", ":w1_0", ":w1_1"]);

        let missing = Query::new().with_order_by("NOPE", true);
        assert!(matches!(
            select(&table, &missing),
            Err(Error::FieldNotFound { .. })
        ));
        assert_eq!(
            count(&table, &Query::new()).unwrap().statement,
            "SELECT COUNT(*) AS COUNT FROM CHILDTABLE"
        );
    }

    #[test]
    fn test_delete_with_query() {
        let table = child();
        let filtered = Query::new().with_condition("NAME", QueryOperator::IsNull);
        assert_eq!(
            delete(&table, &filtered).unwrap().statement,
            "DELETE FROM CHILDTABLE WHERE NAME IS NULL"
        );

        let paged = Query::new()
            .with_condition("PARENT_ID", QueryOperator::Equal(AppValue::Integer(1)))
            .with_order_by("ID", false)
            .with_limit(2);
        let sql = delete(&table, &paged).unwrap();
        assert_eq!(
            sql.statement,
            "DELETE FROM CHILDTABLE WHERE rowid IN (SELECT rowid FROM CHILDTABLE \
             WHERE PARENT_ID = :w0_0 ORDER BY ID DESC LIMIT 2)"
        );
        assert_eq!(sql.placeholders, [":w0_0"]);

        assert_eq!(
            delete(&table, &Query::new().with_offset(3)).unwrap().statement,
            "DELETE FROM CHILDTABLE WHERE rowid IN (SELECT rowid FROM CHILDTABLE LIMIT -1 OFFSET 3)"
        );
        assert!(matches!(
            delete(&table, &Query::new().with_order_by("NOPE", true)),
            Err(Error::FieldNotFound { .. })
        ));
    }
}
