use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::future::Future;

use log::{debug, info};
use serde_json::Value;
use sqlite_wasm_rs::export::{install_opfs_sahpool, *};

use crate::engine::{Engine, EngineLoader, InitOptions, QueryResult, StatementId};
use crate::errors::BridgeError;
use crate::params::{
    blob_to_json, decode_params, integer_to_json, validate_placeholders, SqlValue,
};
use crate::util::{only_whitespace_and_comments, sanitize_db_filename};

/// SQLite connection opened through `sqlite-wasm-rs`, either in memory or in
/// the OPFS pool.
pub struct SQLiteDatabase {
    db: *mut sqlite3,
    statements: HashMap<StatementId, *mut sqlite3_stmt>,
    next_statement: StatementId,
}

/// Finalizes a statement on early return unless ownership is taken back.
struct StmtGuard {
    stmt: *mut sqlite3_stmt,
}

impl StmtGuard {
    fn take(mut self) -> *mut sqlite3_stmt {
        std::mem::replace(&mut self.stmt, std::ptr::null_mut())
    }
}

impl Drop for StmtGuard {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            unsafe { sqlite3_finalize(self.stmt) };
        }
    }
}

/// One compiled statement plus where parsing stopped.
struct Prepared {
    stmt: *mut sqlite3_stmt,
    tail: *const c_char,
}

impl Prepared {
    fn tail_is_trivia(&self) -> bool {
        if self.tail.is_null() {
            return true;
        }
        // tail points into the NUL-terminated buffer handed to sqlite3_prepare_v2
        let rest = unsafe { CStr::from_ptr(self.tail) };
        only_whitespace_and_comments(rest.to_bytes())
    }
}

impl SQLiteDatabase {
    pub async fn open(options: &InitOptions) -> Result<Self, BridgeError> {
        let uri = match options.persistent_name() {
            Some(name) => {
                install_opfs_sahpool(None, true).await.map_err(|e| {
                    BridgeError::LoadFailed(format!("Failed to install OPFS VFS: {e:?}"))
                })?;
                format!("opfs-sahpool:{}", sanitize_db_filename(name))
            }
            None => ":memory:".to_string(),
        };
        let uri_c = CString::new(uri.clone()).map_err(|e| {
            BridgeError::LoadFailed(format!("Invalid database URI (NUL found): {uri} ({e})"))
        })?;

        let mut db: *mut sqlite3 = std::ptr::null_mut();
        let ret = unsafe {
            sqlite3_open_v2(
                uri_c.as_ptr(),
                &mut db as *mut _,
                SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE,
                std::ptr::null(),
            )
        };
        if ret != SQLITE_OK {
            let error_msg = if db.is_null() {
                format!("SQLite open error code: {ret}")
            } else {
                let msg = errmsg(db, ret);
                unsafe { sqlite3_close(db) };
                msg
            };
            return Err(BridgeError::LoadFailed(format!(
                "Failed to open SQLite database: {error_msg}"
            )));
        }

        info!("[Worker] Opened SQLite database at {uri}");
        Ok(SQLiteDatabase {
            db,
            statements: HashMap::new(),
            next_statement: 0,
        })
    }

    fn prepare_at(&self, sql: *const c_char) -> Result<Prepared, BridgeError> {
        let mut stmt: *mut sqlite3_stmt = std::ptr::null_mut();
        let mut tail: *const c_char = std::ptr::null();
        let ret = unsafe { sqlite3_prepare_v2(self.db, sql, -1, &mut stmt, &mut tail) };
        if ret != SQLITE_OK {
            return Err(BridgeError::Engine(format!(
                "Failed to prepare statement: {}",
                errmsg(self.db, ret)
            )));
        }
        Ok(Prepared { stmt, tail })
    }

    /// Compile exactly one statement; trailing whitespace and comments are fine.
    fn prepare_single(&self, sql: &CString) -> Result<StmtGuard, BridgeError> {
        let prepared = self.prepare_at(sql.as_ptr())?;
        let guard = StmtGuard {
            stmt: prepared.stmt,
        };
        if !prepared.tail_is_trivia() {
            return Err(BridgeError::Engine(
                "Parameterized queries must contain a single statement.".to_string(),
            ));
        }
        Ok(guard)
    }

    fn bind(
        &self,
        stmt: *mut sqlite3_stmt,
        params: &[Value],
    ) -> Result<Vec<SqlValue>, BridgeError> {
        let count = unsafe { sqlite3_bind_parameter_count(stmt) };
        let names: Vec<Option<String>> = (1..=count)
            .map(|i| {
                let ptr = unsafe { sqlite3_bind_parameter_name(stmt, i) };
                (!ptr.is_null())
                    .then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            })
            .collect();
        validate_placeholders(&names, params.len())?;

        // Bound with SQLITE_STATIC: the returned values must outlive stepping.
        let values = decode_params(params)?;
        for (slot, value) in (1..).zip(values.iter()) {
            let rc = unsafe {
                match value {
                    SqlValue::Null => sqlite3_bind_null(stmt, slot),
                    SqlValue::Integer(v) => sqlite3_bind_int64(stmt, slot, *v),
                    SqlValue::Real(v) => sqlite3_bind_double(stmt, slot, *v),
                    SqlValue::Text(s) => sqlite3_bind_text(
                        stmt,
                        slot,
                        s.as_ptr() as *const c_char,
                        s.len() as c_int,
                        None::<unsafe extern "C" fn(*mut c_void)>,
                    ),
                    SqlValue::Blob(bytes) => sqlite3_bind_blob(
                        stmt,
                        slot,
                        bytes.as_ptr() as *const c_void,
                        bytes.len() as c_int,
                        None::<unsafe extern "C" fn(*mut c_void)>,
                    ),
                }
            };
            if rc != SQLITE_OK {
                return Err(BridgeError::Engine(format!(
                    "Failed to bind parameter {slot}: {}",
                    errmsg(self.db, rc)
                )));
            }
        }
        Ok(values)
    }

    /// Step until done. Does not finalize.
    fn step_all(&self, stmt: *mut sqlite3_stmt) -> Result<QueryResult, BridgeError> {
        let col_count = unsafe { sqlite3_column_count(stmt) };
        let columns = (0..col_count)
            .map(|i| {
                let ptr = unsafe { sqlite3_column_name(stmt, i) };
                if ptr.is_null() {
                    format!("column_{i}")
                } else {
                    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
                }
            })
            .collect();

        let mut values = Vec::new();
        loop {
            match unsafe { sqlite3_step(stmt) } {
                SQLITE_ROW => {
                    values.push((0..col_count).map(|i| column_value(stmt, i)).collect());
                }
                SQLITE_DONE => break,
                rc => {
                    return Err(BridgeError::Engine(format!(
                        "Query execution failed: {}",
                        errmsg(self.db, rc)
                    )))
                }
            }
        }
        Ok(QueryResult { columns, values })
    }

    fn in_transaction(&self) -> bool {
        unsafe { sqlite3_get_autocommit(self.db) == 0 }
    }

    fn rollback_if_open(&self) {
        if self.in_transaction() {
            let rollback = c"ROLLBACK";
            let _ = unsafe {
                sqlite3_exec(
                    self.db,
                    rollback.as_ptr(),
                    None,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
        }
    }

    fn exec_with_params(
        &self,
        sql: &CString,
        params: &[Value],
    ) -> Result<Vec<QueryResult>, BridgeError> {
        let guard = self.prepare_single(sql)?;
        if guard.stmt.is_null() {
            return validate_placeholders(&[], params.len()).map(|_| Vec::new());
        }
        let _bound = self.bind(guard.stmt, params)?;
        let result = self.step_all(guard.stmt)?;
        Ok(non_empty(result).into_iter().collect())
    }

    /// Statements run in order; only those that yield rows contribute a result.
    fn exec_script(&self, sql: &CString) -> Result<Vec<QueryResult>, BridgeError> {
        let mut results = Vec::new();
        let mut ptr = sql.as_ptr();
        let mut index = 0usize;

        loop {
            let prepared = self.prepare_at(ptr).map_err(|err| {
                self.rollback_if_open();
                BridgeError::Engine(format!("Statement {} failed: {err}", index + 1))
            })?;

            if !prepared.stmt.is_null() {
                index += 1;
                let guard = StmtGuard {
                    stmt: prepared.stmt,
                };
                match self.step_all(guard.stmt) {
                    Ok(result) => results.extend(non_empty(result)),
                    Err(err) => {
                        drop(guard);
                        self.rollback_if_open();
                        return Err(BridgeError::Engine(format!(
                            "Statement {index} failed: {err}"
                        )));
                    }
                }
            }

            if prepared.tail.is_null() || prepared.tail == ptr {
                break;
            }
            ptr = prepared.tail;
            if unsafe { *ptr } == 0 {
                break;
            }
        }

        debug!("[Worker] Executed {index} statement(s)");
        Ok(results)
    }

    fn statement(&self, id: StatementId) -> Result<*mut sqlite3_stmt, BridgeError> {
        self.statements
            .get(&id)
            .copied()
            .ok_or(BridgeError::UnknownStatement(id))
    }

    fn finalize_all(&mut self) {
        for (_, stmt) in self.statements.drain() {
            unsafe { sqlite3_finalize(stmt) };
        }
    }
}

impl Engine for SQLiteDatabase {
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<Vec<QueryResult>, BridgeError> {
        let sql_c = CString::new(sql)
            .map_err(|e| BridgeError::Engine(format!("Invalid SQL string: {e}")))?;
        if params.is_empty() {
            self.exec_script(&sql_c)
        } else {
            self.exec_with_params(&sql_c, params)
        }
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId, BridgeError> {
        let sql_c = CString::new(sql)
            .map_err(|e| BridgeError::Engine(format!("Invalid SQL string: {e}")))?;
        let guard = self.prepare_single(&sql_c)?;
        if guard.stmt.is_null() {
            return Err(BridgeError::Engine("No statement to prepare.".to_string()));
        }
        self.next_statement = self.next_statement.wrapping_add(1).max(1);
        let id = self.next_statement;
        self.statements.insert(id, guard.take());
        Ok(id)
    }

    fn run(
        &mut self,
        statement: StatementId,
        params: &[Value],
    ) -> Result<QueryResult, BridgeError> {
        let stmt = self.statement(statement)?;
        unsafe {
            sqlite3_reset(stmt);
            sqlite3_clear_bindings(stmt);
        }
        let outcome = self
            .bind(stmt, params)
            .and_then(|bound| self.step_all(stmt).map(|result| (bound, result)));
        // Bindings point into `bound`; clear them before it is dropped.
        unsafe {
            sqlite3_reset(stmt);
            sqlite3_clear_bindings(stmt);
        }
        outcome.map(|(_, result)| result)
    }

    fn free(&mut self, statement: StatementId) -> Result<(), BridgeError> {
        let stmt = self
            .statements
            .remove(&statement)
            .ok_or(BridgeError::UnknownStatement(statement))?;
        unsafe { sqlite3_finalize(stmt) };
        Ok(())
    }

    fn close(&mut self) -> Result<(), BridgeError> {
        if self.db.is_null() {
            return Ok(());
        }
        self.finalize_all();
        let ret = unsafe { sqlite3_close(self.db) };
        if ret != SQLITE_OK {
            return Err(BridgeError::Engine(format!(
                "Failed to close database: {}",
                errmsg(self.db, ret)
            )));
        }
        self.db = std::ptr::null_mut();
        Ok(())
    }
}

impl Drop for SQLiteDatabase {
    fn drop(&mut self) {
        if !self.db.is_null() {
            self.finalize_all();
            unsafe { sqlite3_close(self.db) };
        }
    }
}

/// Opens [`SQLiteDatabase`] handles for `init`.
#[derive(Default)]
pub struct SQLiteLoader;

impl EngineLoader for SQLiteLoader {
    type Engine = SQLiteDatabase;

    fn load(
        &self,
        options: InitOptions,
    ) -> impl Future<Output = Result<SQLiteDatabase, BridgeError>> {
        async move { SQLiteDatabase::open(&options).await }
    }
}

fn errmsg(db: *mut sqlite3, rc: c_int) -> String {
    let ptr = unsafe { sqlite3_errmsg(db) };
    if ptr.is_null() {
        format!("SQLite error code: {rc}")
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

fn column_value(stmt: *mut sqlite3_stmt, i: c_int) -> Value {
    match unsafe { sqlite3_column_type(stmt, i) } {
        SQLITE_INTEGER => integer_to_json(unsafe { sqlite3_column_int64(stmt, i) }),
        SQLITE_FLOAT => serde_json::Number::from_f64(unsafe { sqlite3_column_double(stmt, i) })
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SQLITE_TEXT => {
            let ptr = unsafe { sqlite3_column_text(stmt, i) };
            let len = unsafe { sqlite3_column_bytes(stmt, i) };
            if ptr.is_null() {
                return Value::Null;
            }
            let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        SQLITE_BLOB => {
            let ptr = unsafe { sqlite3_column_blob(stmt, i) };
            let len = unsafe { sqlite3_column_bytes(stmt, i) };
            if ptr.is_null() || len <= 0 {
                return blob_to_json(&[]);
            }
            let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) };
            blob_to_json(bytes)
        }
        _ => Value::Null,
    }
}

fn non_empty(result: QueryResult) -> Option<QueryResult> {
    (!result.values.is_empty()).then_some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    async fn memory_db() -> SQLiteDatabase {
        SQLiteDatabase::open(&InitOptions::default())
            .await
            .expect("In-memory database should open")
    }

    #[wasm_bindgen_test]
    async fn test_opfs_open_when_available() {
        let options = InitOptions {
            db_name: Some("bridge-test".to_string()),
        };
        // OPFS is not available in every test browser
        if let Ok(mut db) = SQLiteDatabase::open(&options).await {
            assert!(!db.db.is_null());
            db.close().expect("Close should succeed");
        }
    }

    #[wasm_bindgen_test]
    async fn test_create_insert_select() {
        let mut db = memory_db().await;
        let results = db
            .exec(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 INSERT INTO users (name) VALUES ('alice'), ('bob');
                 SELECT id, name FROM users ORDER BY id;",
                &[],
            )
            .expect("Script should run");

        assert_eq!(results.len(), 1, "Only the SELECT yields rows");
        assert_eq!(results[0].columns, vec!["id", "name"]);
        assert_eq!(
            results[0].values,
            vec![vec![json!(1), json!("alice")], vec![json!(2), json!("bob")]]
        );
    }

    #[wasm_bindgen_test]
    async fn test_empty_select_yields_no_result() {
        let mut db = memory_db().await;
        db.exec("CREATE TABLE t (a INTEGER)", &[]).unwrap();
        let results = db.exec("SELECT a FROM t", &[]).unwrap();
        assert!(results.is_empty());
    }

    #[wasm_bindgen_test]
    async fn test_multiple_selects_each_yield_a_result() {
        let mut db = memory_db().await;
        let results = db.exec("SELECT 1 AS a; SELECT 'x' AS b, 2.5 AS c;", &[]).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].columns, vec!["b", "c"]);
        assert_eq!(results[1].values, vec![vec![json!("x"), json!(2.5)]]);
    }

    #[wasm_bindgen_test]
    async fn test_positional_params_multiple_types() {
        let mut db = memory_db().await;
        db.exec(
            "CREATE TABLE p (n TEXT, b INTEGER, i INTEGER, f REAL, s TEXT)",
            &[],
        )
        .unwrap();
        db.exec(
            "INSERT INTO p VALUES (?, ?, ?, ?, ?)",
            &[json!(null), json!(true), json!(42), json!(3.5), json!("hello")],
        )
        .expect("Insert with params should succeed");

        let results = db
            .exec("SELECT n, b, i, f, s FROM p WHERE i = ?", &[json!(42)])
            .unwrap();
        assert_eq!(
            results[0].values,
            vec![vec![json!(null), json!(1), json!(42), json!(3.5), json!("hello")]]
        );
    }

    #[wasm_bindgen_test]
    async fn test_numbered_params() {
        let mut db = memory_db().await;
        let results = db.exec("SELECT ?1 AS a, ?1 AS b, ?2 AS c", &[json!(7), json!("z")]).unwrap();
        assert_eq!(results[0].values, vec![vec![json!(7), json!(7), json!("z")]]);

        let err = db.exec("SELECT ?1, ?3", &[json!(1), json!(2), json!(3)]).unwrap_err();
        assert!(err.to_string().contains("Missing parameter index ?2"));
    }

    #[wasm_bindgen_test]
    async fn test_param_count_mismatch() {
        let mut db = memory_db().await;
        let err = db.exec("SELECT ?, ?", &[json!(1)]).unwrap_err();
        assert_eq!(err.to_string(), "Expected 2 parameters but got 1.");

        let err = db.exec("SELECT 1", &[json!(1)]).unwrap_err();
        assert_eq!(err.to_string(), "No parameters expected but 1 provided.");
    }

    #[wasm_bindgen_test]
    async fn test_params_require_single_statement() {
        let mut db = memory_db().await;
        let err = db.exec("SELECT ?; SELECT 2", &[json!(1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parameterized queries must contain a single statement."
        );

        let ok = db.exec("SELECT ? AS v; -- done", &[json!(1)]).unwrap();
        assert_eq!(ok[0].values, vec![vec![json!(1)]]);
    }

    #[wasm_bindgen_test]
    async fn test_blob_and_bigint_round_trip() {
        let mut db = memory_db().await;
        db.exec("CREATE TABLE b (data BLOB, big INTEGER)", &[]).unwrap();
        db.exec(
            "INSERT INTO b VALUES (?, ?)",
            &[
                json!({"__type": "blob", "base64": "AQID"}),
                json!({"__type": "bigint", "value": "9007199254740993"}),
            ],
        )
        .unwrap();

        let results = db.exec("SELECT data, big FROM b", &[]).unwrap();
        assert_eq!(
            results[0].values,
            vec![vec![
                json!({"__type": "blob", "base64": "AQID"}),
                json!({"__type": "bigint", "value": "9007199254740993"})
            ]]
        );
    }

    #[wasm_bindgen_test]
    async fn test_syntax_error_reports_statement() {
        let mut db = memory_db().await;
        let err = db.exec("SELECT 1; SELEC 2;", &[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Statement 2 failed"), "got {msg}");
        assert!(msg.contains("syntax error"));
    }

    #[wasm_bindgen_test]
    async fn test_failed_script_rolls_back_transaction() {
        let mut db = memory_db().await;
        db.exec("CREATE TABLE t (a INTEGER UNIQUE)", &[]).unwrap();
        let err = db.exec(
            "BEGIN; INSERT INTO t VALUES (1); INSERT INTO t VALUES (1); COMMIT;",
            &[],
        );
        assert!(err.is_err());
        assert!(!db.in_transaction(), "Transaction should be rolled back");

        let results = db.exec("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(results[0].values, vec![vec![json!(0)]]);
    }

    #[wasm_bindgen_test]
    async fn test_semicolons_inside_literals_and_comments() {
        let mut db = memory_db().await;
        let results = db
            .exec("SELECT 'a;b' AS s; /* ; */ -- ;\n SELECT 2 AS n;", &[])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].values, vec![vec![json!("a;b")]]);
    }

    #[wasm_bindgen_test]
    async fn test_empty_script() {
        let mut db = memory_db().await;
        assert!(db.exec("   -- nothing\n", &[]).unwrap().is_empty());
        assert!(db.exec("", &[]).unwrap().is_empty());
    }

    #[wasm_bindgen_test]
    async fn test_sql_with_nul_byte() {
        let mut db = memory_db().await;
        let err = db.exec("SELECT 1\0", &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid SQL string"));
    }

    #[wasm_bindgen_test]
    async fn test_prepare_run_free() {
        let mut db = memory_db().await;
        db.exec("CREATE TABLE kv (k TEXT, v INTEGER)", &[]).unwrap();

        let insert = db.prepare("INSERT INTO kv VALUES (?, ?)").unwrap();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            let result = db.run(insert, &[json!(k), json!(v)]).unwrap();
            assert!(result.columns.is_empty());
        }

        let select = db.prepare("SELECT k FROM kv WHERE v >= ? ORDER BY k").unwrap();
        assert_ne!(insert, select);
        let result = db.run(select, &[json!(2)]).unwrap();
        assert_eq!(result.columns, vec!["k"]);
        assert_eq!(result.values, vec![vec![json!("b")], vec![json!("c")]]);

        let again = db.run(select, &[json!(4)]).unwrap();
        assert!(again.values.is_empty(), "Statement should be reset between runs");

        db.free(select).unwrap();
        assert_eq!(db.run(select, &[]), Err(BridgeError::UnknownStatement(select)));
        assert!(db.free(select).is_err());
    }

    #[wasm_bindgen_test]
    async fn test_prepare_rejects_scripts_and_empty_sql() {
        let mut db = memory_db().await;
        assert!(db.prepare("SELECT 1; SELECT 2").is_err());
        assert_eq!(
            db.prepare("  ").unwrap_err().to_string(),
            "No statement to prepare."
        );
        assert!(db.prepare("SELECT * FROM missing").is_err());
    }

    #[wasm_bindgen_test]
    async fn test_close_finalizes_statements() {
        let mut db = memory_db().await;
        let _stmt = db.prepare("SELECT 1").unwrap();
        db.close().expect("Close should finalize open statements");
        assert!(db.db.is_null());
        db.close().expect("Second close is a no-op");
    }
}
