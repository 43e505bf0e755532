//! CRUD statement handles.
//!
//! Each handle wraps a structural *skeleton* (operation kind, target and
//! clause shape) shared behind an `Arc`, plus the bound values for this
//! particular execution. Cloning a handle shares the skeleton; structural
//! mutation (adding a sort, a projection, a SET item) forks it copy-on-write,
//! while binding values never does. The skeleton's hash is the fingerprint
//! the per-connection statement cache keys on, so handles that differ only
//! in bound values share one server-side prepared statement.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use xdev_wire::{ExecResult, Fingerprint, Value};

use crate::error::Error;
use crate::session::Session;

/// Row locking requested by a read statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// `FOR SHARE`: other transactions may read but not modify.
    Shared,
    /// `FOR UPDATE`: other transactions block until this one ends.
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CrudKind {
    Find,
    Remove,
    Modify,
    Insert,
    Select,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SetOp {
    Set,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SetItem {
    path: String,
    op: SetOp,
}

/// The structural shape of a statement: everything that determines the SQL
/// text, and nothing that does not. Bound values live on the handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Skeleton {
    kind: CrudKind,
    target: String,
    projection: Vec<String>,
    columns: Vec<String>,
    criteria: Option<String>,
    updates: Vec<SetItem>,
    sort: Vec<String>,
    group_by: Vec<String>,
    having: Option<String>,
    has_limit: bool,
    has_offset: bool,
    lock: Option<LockMode>,
    row_groups: usize,
    row_arity: usize,
}

impl Skeleton {
    fn new(kind: CrudKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            projection: Vec::new(),
            columns: Vec::new(),
            criteria: None,
            updates: Vec::new(),
            sort: Vec::new(),
            group_by: Vec::new(),
            having: None,
            has_limit: false,
            has_offset: false,
            lock: None,
            row_groups: 0,
            row_arity: 0,
        }
    }

    fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Produce the SQL text (named placeholders rewritten to `?`) and the
    /// placeholder names in parameter order.
    fn render(&self) -> Result<(String, Vec<String>), Error> {
        let mut sql = String::new();
        let mut names = Vec::new();
        match self.kind {
            CrudKind::Find | CrudKind::Select => {
                sql.push_str("SELECT ");
                if self.projection.is_empty() {
                    sql.push_str(if self.kind == CrudKind::Find { "doc" } else { "*" });
                } else {
                    sql.push_str(&self.projection.join(", "));
                }
                sql.push_str(" FROM ");
                sql.push_str(&self.target);
                self.push_filter(&mut sql, &mut names);
                if !self.group_by.is_empty() {
                    sql.push_str(" GROUP BY ");
                    sql.push_str(&self.group_by.join(", "));
                }
                if let Some(having) = &self.having {
                    sql.push_str(" HAVING ");
                    rewrite_placeholders(having, &mut sql, &mut names);
                }
                self.push_order(&mut sql);
                self.push_limit_offset(&mut sql);
                match self.lock {
                    Some(LockMode::Shared) => sql.push_str(" FOR SHARE"),
                    Some(LockMode::Exclusive) => sql.push_str(" FOR UPDATE"),
                    None => {}
                }
            }
            CrudKind::Remove => {
                sql.push_str("DELETE FROM ");
                sql.push_str(&self.target);
                self.push_filter(&mut sql, &mut names);
                self.push_order(&mut sql);
                self.push_limit_offset(&mut sql);
            }
            CrudKind::Modify | CrudKind::Update => {
                if self.updates.is_empty() {
                    return Err(Error::Statement(
                        "update statement has no set/unset operations".into(),
                    ));
                }
                sql.push_str("UPDATE ");
                sql.push_str(&self.target);
                sql.push_str(" SET ");
                for (i, item) in self.updates.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push_str(&item.path);
                    sql.push_str(match item.op {
                        SetOp::Set => " = ?",
                        SetOp::Unset => " = NULL",
                    });
                }
                self.push_filter(&mut sql, &mut names);
                self.push_order(&mut sql);
                self.push_limit_offset(&mut sql);
            }
            CrudKind::Insert => {
                if self.row_groups == 0 {
                    return Err(Error::Statement("insert statement has no rows".into()));
                }
                if self.row_arity == 0 {
                    return Err(Error::Statement("insert rows have no values".into()));
                }
                sql.push_str("INSERT INTO ");
                sql.push_str(&self.target);
                if !self.columns.is_empty() {
                    sql.push_str(" (");
                    sql.push_str(&self.columns.join(", "));
                    sql.push(')');
                }
                sql.push_str(" VALUES ");
                let group = placeholder_group(self.row_arity);
                for i in 0..self.row_groups {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push_str(&group);
                }
            }
        }
        Ok((sql, names))
    }

    fn push_filter(&self, sql: &mut String, names: &mut Vec<String>) {
        if let Some(criteria) = &self.criteria {
            sql.push_str(" WHERE ");
            rewrite_placeholders(criteria, sql, names);
        }
    }

    fn push_order(&self, sql: &mut String) {
        if !self.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.sort.join(", "));
        }
    }

    fn push_limit_offset(&self, sql: &mut String) {
        if self.has_limit {
            sql.push_str(" LIMIT ?");
        }
        if self.has_offset {
            sql.push_str(" OFFSET ?");
        }
    }
}

/// Rewrite `:name` placeholders to `?`, appending the encountered names in
/// order. Placeholders inside single-quoted literals are left alone.
fn rewrite_placeholders(text: &str, out: &mut String, names: &mut Vec<String>) {
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_string = !in_string;
                out.push(c);
            }
            ':' if !in_string
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                names.push(name);
                out.push('?');
            }
            _ => out.push(c),
        }
    }
}

fn placeholder_group(arity: usize) -> String {
    let mut group = String::from("(");
    for i in 0..arity {
        if i > 0 {
            group.push_str(", ");
        }
        group.push('?');
    }
    group.push(')');
    group
}

/// Shared core of every handle: the skeleton plus this handle's values.
#[derive(Debug, Clone)]
struct CrudStatement {
    skeleton: Arc<Skeleton>,
    binds: Vec<(String, Value)>,
    set_values: Vec<Value>,
    rows: Vec<Vec<Value>>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl CrudStatement {
    fn new(kind: CrudKind, target: impl Into<String>) -> Self {
        Self {
            skeleton: Arc::new(Skeleton::new(kind, target)),
            binds: Vec::new(),
            set_values: Vec::new(),
            rows: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Structural mutation point: forks the skeleton if it is shared.
    fn skeleton_mut(&mut self) -> &mut Skeleton {
        Arc::make_mut(&mut self.skeleton)
    }

    fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.binds.push((name.into(), value.into()));
    }

    fn set_limit(&mut self, n: u64) {
        if !self.skeleton.has_limit {
            self.skeleton_mut().has_limit = true;
        }
        self.limit = Some(n);
    }

    fn set_offset(&mut self, n: u64) {
        if !self.skeleton.has_offset {
            self.skeleton_mut().has_offset = true;
        }
        self.offset = Some(n);
    }

    fn push_set(&mut self, path: impl Into<String>, value: Value) {
        self.skeleton_mut().updates.push(SetItem {
            path: path.into(),
            op: SetOp::Set,
        });
        self.set_values.push(value);
    }

    fn push_unset(&mut self, path: impl Into<String>) {
        self.skeleton_mut().updates.push(SetItem {
            path: path.into(),
            op: SetOp::Unset,
        });
    }

    fn push_row(&mut self, row: Vec<Value>) {
        let skeleton = self.skeleton_mut();
        if skeleton.row_groups == 0 && skeleton.columns.is_empty() {
            skeleton.row_arity = row.len();
        }
        skeleton.row_groups += 1;
        self.rows.push(row);
    }

    fn set_columns(&mut self, columns: Vec<String>) {
        let skeleton = self.skeleton_mut();
        skeleton.row_arity = columns.len();
        skeleton.columns = columns;
    }

    /// Assemble the flat parameter list in SQL placeholder order.
    fn params(&self, placeholder_names: &[String]) -> Result<Vec<Value>, Error> {
        let mut out = Vec::new();
        if self.skeleton.kind == CrudKind::Insert {
            let arity = self.skeleton.row_arity;
            for row in &self.rows {
                if row.len() != arity {
                    return Err(Error::Statement(format!(
                        "insert row has {} values, expected {arity}",
                        row.len()
                    )));
                }
                out.extend(row.iter().cloned());
            }
            return Ok(out);
        }

        out.extend(self.set_values.iter().cloned());
        for name in placeholder_names {
            // Later binds of the same name win.
            let value = self
                .binds
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    Error::Statement(format!("placeholder ':{name}' is not bound"))
                })?;
            out.push(value);
        }
        if self.skeleton.has_limit {
            out.push(Value::UInt(self.limit.unwrap_or(0)));
        }
        if self.skeleton.has_offset {
            out.push(Value::UInt(self.offset.unwrap_or(0)));
        }
        Ok(out)
    }

    async fn execute(&self, session: &mut Session) -> Result<ExecResult, Error> {
        let (text, names) = self.skeleton.render()?;
        let params = self.params(&names)?;
        session
            .execute_shape(self.skeleton.fingerprint(), &text, params)
            .await
    }
}

macro_rules! common_methods {
    () => {
        /// Bind a value to a named placeholder. Binding never forks the
        /// shared statement shape.
        #[must_use]
        pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
            self.stmt.bind(name, value);
            self
        }

        /// Execute the statement on a session.
        pub async fn execute(&self, session: &mut Session) -> Result<ExecResult, Error> {
            self.stmt.execute(session).await
        }
    };
}

macro_rules! filter_methods {
    () => {
        /// Set the filter expression. Named placeholders (`:name`) are bound
        /// with [`bind`](Self::bind).
        #[must_use]
        pub fn criteria(mut self, criteria: impl Into<String>) -> Self {
            self.stmt.skeleton_mut().criteria = Some(criteria.into());
            self
        }

        /// Set the ordering expressions.
        #[must_use]
        pub fn sort<I, S>(mut self, exprs: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.stmt.skeleton_mut().sort = exprs.into_iter().map(Into::into).collect();
            self
        }

        /// Cap the number of affected or returned rows. The cap value is a
        /// bound parameter, so changing it never forks the statement shape.
        #[must_use]
        pub fn limit(mut self, n: u64) -> Self {
            self.stmt.set_limit(n);
            self
        }
    };
}

macro_rules! read_methods {
    () => {
        /// Set the grouping expressions.
        #[must_use]
        pub fn group_by<I, S>(mut self, exprs: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.stmt.skeleton_mut().group_by = exprs.into_iter().map(Into::into).collect();
            self
        }

        /// Set the post-grouping filter.
        #[must_use]
        pub fn having(mut self, having: impl Into<String>) -> Self {
            self.stmt.skeleton_mut().having = Some(having.into());
            self
        }

        /// Skip the first `n` rows.
        #[must_use]
        pub fn offset(mut self, n: u64) -> Self {
            self.stmt.set_offset(n);
            self
        }

        /// Read with a shared row lock (`FOR SHARE`).
        #[must_use]
        pub fn lock_shared(mut self) -> Self {
            self.stmt.skeleton_mut().lock = Some(LockMode::Shared);
            self
        }

        /// Read with an exclusive row lock (`FOR UPDATE`).
        #[must_use]
        pub fn lock_exclusive(mut self) -> Self {
            self.stmt.skeleton_mut().lock = Some(LockMode::Exclusive);
            self
        }
    };
}

macro_rules! update_methods {
    () => {
        /// Set a field or column to a bound value.
        #[must_use]
        pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
            self.stmt.push_set(path, value.into());
            self
        }

        /// Clear a field or column (`= NULL`).
        #[must_use]
        pub fn unset(mut self, path: impl Into<String>) -> Self {
            self.stmt.push_unset(path);
            self
        }
    };
}

/// Document lookup: `SELECT doc FROM target ...`.
#[derive(Debug, Clone)]
pub struct Find {
    stmt: CrudStatement,
}

impl Find {
    /// Find documents in a collection (`schema.collection`).
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Find, target),
        }
    }

    /// Project specific document fields instead of the whole document.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stmt.skeleton_mut().projection = fields.into_iter().map(Into::into).collect();
        self
    }

    filter_methods!();
    read_methods!();
    common_methods!();
}

/// Relational lookup: `SELECT columns FROM target ...`.
#[derive(Debug, Clone)]
pub struct Select {
    stmt: CrudStatement,
}

impl Select {
    /// Select rows from a table (`schema.table`).
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Select, target),
        }
    }

    /// Project specific columns instead of `*`.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stmt.skeleton_mut().projection = columns.into_iter().map(Into::into).collect();
        self
    }

    filter_methods!();
    read_methods!();
    common_methods!();
}

/// Document deletion: `DELETE FROM target ...`.
#[derive(Debug, Clone)]
pub struct Remove {
    stmt: CrudStatement,
}

impl Remove {
    /// Remove documents from a collection.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Remove, target),
        }
    }

    filter_methods!();
    common_methods!();
}

/// Document update: `UPDATE target SET ...`.
#[derive(Debug, Clone)]
pub struct Modify {
    stmt: CrudStatement,
}

impl Modify {
    /// Modify documents in a collection.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Modify, target),
        }
    }

    update_methods!();
    filter_methods!();
    common_methods!();
}

/// Row insertion: `INSERT INTO target ... VALUES ...`.
#[derive(Debug, Clone)]
pub struct Insert {
    stmt: CrudStatement,
}

impl Insert {
    /// Insert rows into a table or collection.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Insert, target),
        }
    }

    /// Name the columns being inserted. Also fixes the expected row arity.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stmt
            .set_columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Add one row of values. Each call adds a `(...)` group; rows with a
    /// different number of values than the first (or than the named
    /// columns) are rejected at execution.
    #[must_use]
    pub fn values<I, V>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.stmt.push_row(row.into_iter().map(Into::into).collect());
        self
    }

    /// Execute the statement on a session.
    pub async fn execute(&self, session: &mut Session) -> Result<ExecResult, Error> {
        self.stmt.execute(session).await
    }
}

/// Relational update: `UPDATE target SET ...`.
#[derive(Debug, Clone)]
pub struct Update {
    stmt: CrudStatement,
}

impl Update {
    /// Update rows of a table.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            stmt: CrudStatement::new(CrudKind::Update, target),
        }
    }

    update_methods!();
    filter_methods!();
    common_methods!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(stmt: &CrudStatement) -> (String, Vec<String>) {
        stmt.skeleton.render().unwrap()
    }

    #[test]
    fn find_renders_select_with_placeholders() {
        let find = Find::new("app.users")
            .criteria("age > :age AND name = :name")
            .sort(["age DESC"])
            .limit(10);
        let (sql, names) = render(&find.stmt);
        assert_eq!(
            sql,
            "SELECT doc FROM app.users WHERE age > ? AND name = ? ORDER BY age DESC LIMIT ?"
        );
        assert_eq!(names, vec!["age", "name"]);
    }

    #[test]
    fn select_renders_columns_and_locks() {
        let select = Select::new("app.orders")
            .columns(["id", "total"])
            .criteria("total > :min")
            .lock_exclusive();
        let (sql, _) = render(&select.stmt);
        assert_eq!(
            sql,
            "SELECT id, total FROM app.orders WHERE total > ? FOR UPDATE"
        );

        let shared = Select::new("t").lock_shared();
        let (sql, _) = render(&shared.stmt);
        assert_eq!(sql, "SELECT * FROM t FOR SHARE");
    }

    #[test]
    fn modify_renders_set_and_unset() {
        let modify = Modify::new("app.users")
            .set("age", 31)
            .unset("nickname")
            .criteria("id = :id")
            .bind("id", 7);
        let (sql, names) = render(&modify.stmt);
        assert_eq!(
            sql,
            "UPDATE app.users SET age = ?, nickname = NULL WHERE id = ?"
        );
        let params = modify.stmt.params(&names).unwrap();
        assert_eq!(params, vec![Value::Int(31), Value::Int(7)]);
    }

    #[test]
    fn insert_renders_value_groups() {
        let insert = Insert::new("app.t")
            .columns(["a", "b"])
            .values([1, 2])
            .values([3, 4]);
        let (sql, _) = render(&insert.stmt);
        assert_eq!(sql, "INSERT INTO app.t (a, b) VALUES (?, ?), (?, ?)");
        let params = insert.stmt.params(&[]).unwrap();
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn insert_row_arity_mismatch_rejected() {
        let insert = Insert::new("t").columns(["a", "b"]).values([1]);
        assert!(matches!(
            insert.stmt.params(&[]),
            Err(Error::Statement(_))
        ));
    }

    #[test]
    fn unbound_placeholder_rejected() {
        let find = Find::new("t").criteria("x = :missing");
        let (_, names) = render(&find.stmt);
        assert!(matches!(
            find.stmt.params(&names),
            Err(Error::Statement(_))
        ));
    }

    #[test]
    fn placeholders_inside_string_literals_ignored() {
        let find = Find::new("t").criteria("label = ':notaparam' AND x = :x");
        let (sql, names) = render(&find.stmt);
        assert_eq!(sql, "SELECT doc FROM t WHERE label = ':notaparam' AND x = ?");
        assert_eq!(names, vec!["x"]);
    }

    #[test]
    fn binding_shares_the_skeleton() {
        let base = Find::new("t").criteria("x = :x");
        let bound = base.clone().bind("x", 1);
        assert!(Arc::ptr_eq(&base.stmt.skeleton, &bound.stmt.skeleton));
        assert_eq!(
            base.stmt.skeleton.fingerprint(),
            bound.stmt.skeleton.fingerprint()
        );
    }

    #[test]
    fn structural_change_forks_the_skeleton() {
        let base = Find::new("t").criteria("x = :x");
        let sorted = base.clone().sort(["x ASC"]);
        assert!(!Arc::ptr_eq(&base.stmt.skeleton, &sorted.stmt.skeleton));
        assert_ne!(
            base.stmt.skeleton.fingerprint(),
            sorted.stmt.skeleton.fingerprint()
        );
        // The original is untouched.
        let (sql, _) = render(&base.stmt);
        assert_eq!(sql, "SELECT doc FROM t WHERE x = ?");
    }

    #[test]
    fn changing_the_limit_value_does_not_fork() {
        let base = Find::new("t").limit(5);
        let larger = base.clone().limit(50);
        assert!(Arc::ptr_eq(&base.stmt.skeleton, &larger.stmt.skeleton));
        let (_, names) = render(&larger.stmt);
        assert_eq!(larger.stmt.params(&names).unwrap(), vec![Value::UInt(50)]);
    }

    #[test]
    fn update_without_operations_rejected() {
        let update = Update::new("t").criteria("id = :id").bind("id", 1);
        assert!(matches!(
            update.stmt.skeleton.render(),
            Err(Error::Statement(_))
        ));
    }
}
