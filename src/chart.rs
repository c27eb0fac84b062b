//! Sandboxed chart generation.
//!
//! The model writes a small Lua program; this module runs it in a VM whose
//! only injected symbols are the result `rows` and a `plot` table that
//! records a [`ChartSpec`]. Everything dangerous in the Lua standard
//! library (`os`, `io`, `debug`, `load`, `loadfile`, `dofile`, `require`,
//! `package`) is removed before the script sees the globals, so generated
//! code can describe a chart and nothing else — it never touches ambient
//! process state.
//!
//! The VM runs synchronously; callers execute it on a blocking thread and
//! bound the wait with a timeout (see the orchestrator). Any failure in
//! here becomes a [`VisualizationError`] and degrades to "no chart".

use mlua::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::VisualizationError;
use crate::models::Rows;

/// A renderer-agnostic chart description. The UI collaborator decides how
/// to draw it; the core only guarantees the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// One of `bar`, `line`, `scatter`, `pie`.
    pub kind: String,
    pub title: Option<String>,
    pub x: Vec<serde_json::Value>,
    pub y: Vec<serde_json::Value>,
}

/// Run model-generated plot code against the rows. `Ok(None)` when the code
/// ran but never called a `plot` function.
pub fn execute_plot_code(code: &str, rows: &Rows) -> Result<Option<ChartSpec>, VisualizationError> {
    let lua = Lua::new();
    let captured: Arc<Mutex<Option<ChartSpec>>> = Arc::new(Mutex::new(None));

    sandbox_globals(&lua).map_err(|e| VisualizationError(e.to_string()))?;
    register_plot_api(&lua, Arc::clone(&captured)).map_err(|e| VisualizationError(e.to_string()))?;

    let rows_table = rows_to_lua(&lua, rows).map_err(|e| VisualizationError(e.to_string()))?;
    lua.globals()
        .set("rows", rows_table)
        .map_err(|e| VisualizationError(e.to_string()))?;

    lua.load(code)
        .set_name("plot")
        .exec()
        .map_err(|e| VisualizationError(format!("plot code failed: {e}")))?;

    let spec = captured
        .lock()
        .map_err(|_| VisualizationError("plot state poisoned".to_string()))?
        .take();
    Ok(spec)
}

/// Remove every escape hatch from the Lua globals. What is not removed here
/// (string/table/math helpers) is side-effect free.
fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in [
        "os", "io", "debug", "load", "loadfile", "dofile", "require", "package", "print",
    ] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// The fixed symbol table: `plot.bar`, `plot.line`, `plot.scatter`,
/// `plot.pie`, each taking `{ title?, x, y }`. The last call wins.
fn register_plot_api(lua: &Lua, captured: Arc<Mutex<Option<ChartSpec>>>) -> LuaResult<()> {
    let plot = lua.create_table()?;

    for kind in ["bar", "line", "scatter", "pie"] {
        let slot = Arc::clone(&captured);
        plot.set(
            kind,
            lua.create_function(move |_lua, opts: LuaTable| {
                let spec = spec_from_opts(kind, &opts)?;
                *slot
                    .lock()
                    .map_err(|_| mlua::Error::runtime("plot state poisoned"))? = Some(spec);
                Ok(())
            })?,
        )?;
    }

    lua.globals().set("plot", plot)?;
    Ok(())
}

fn spec_from_opts(kind: &str, opts: &LuaTable) -> LuaResult<ChartSpec> {
    let title = opts.get::<Option<String>>("title").unwrap_or(None);
    let x = axis_values(opts.get::<LuaValue>("x")?)?;
    let y = axis_values(opts.get::<LuaValue>("y")?)?;
    Ok(ChartSpec {
        kind: kind.to_string(),
        title,
        x,
        y,
    })
}

fn axis_values(value: LuaValue) -> LuaResult<Vec<serde_json::Value>> {
    match value {
        LuaValue::Table(t) => {
            let len = t.raw_len();
            let mut values = Vec::with_capacity(len);
            for i in 1..=len {
                values.push(lua_scalar_to_json(t.raw_get(i)?));
            }
            Ok(values)
        }
        LuaValue::Nil => Ok(Vec::new()),
        other => Err(mlua::Error::runtime(format!(
            "axis must be an array, got {}",
            other.type_name()
        ))),
    }
}

fn lua_scalar_to_json(value: LuaValue) -> serde_json::Value {
    match value {
        LuaValue::Boolean(b) => serde_json::Value::from(b),
        LuaValue::Integer(i) => serde_json::Value::from(i),
        LuaValue::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        LuaValue::String(s) => s
            .to_str()
            .map(|s| serde_json::Value::from(s.to_string()))
            .unwrap_or(serde_json::Value::Null),
        _ => serde_json::Value::Null,
    }
}

/// Expose the rows as a plain Lua array of tables.
fn rows_to_lua(lua: &Lua, rows: &Rows) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    for (i, row) in rows.iter().enumerate() {
        let row_table = lua.create_table()?;
        for (key, value) in row {
            row_table.set(key.as_str(), json_scalar_to_lua(lua, value)?)?;
        }
        table.set(i as i64 + 1, row_table)?;
    }
    Ok(table)
}

fn json_scalar_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    match value {
        serde_json::Value::Null => Ok(LuaValue::Nil),
        serde_json::Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => lua.create_string(s).map(LuaValue::String),
        // Nested values do not occur in warehouse rows; render as text.
        other => lua
            .create_string(other.to_string())
            .map(LuaValue::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;

    fn sample_rows() -> Rows {
        let mut row_a = Row::new();
        row_a.insert("client".to_string(), serde_json::json!("acme"));
        row_a.insert("count".to_string(), serde_json::json!(3));
        let mut row_b = Row::new();
        row_b.insert("client".to_string(), serde_json::json!("globex"));
        row_b.insert("count".to_string(), serde_json::json!(5));
        vec![row_a, row_b]
    }

    #[test]
    fn test_bar_chart_from_rows() {
        let code = r#"
            local xs, ys = {}, {}
            for i, row in ipairs(rows) do
                xs[i] = row.client
                ys[i] = row.count
            end
            plot.bar{ title = "allocations per client", x = xs, y = ys }
        "#;
        let spec = execute_plot_code(code, &sample_rows()).unwrap().unwrap();
        assert_eq!(spec.kind, "bar");
        assert_eq!(spec.title.as_deref(), Some("allocations per client"));
        assert_eq!(spec.x, vec![serde_json::json!("acme"), serde_json::json!("globex")]);
        assert_eq!(spec.y, vec![serde_json::json!(3), serde_json::json!(5)]);
    }

    #[test]
    fn test_no_plot_call_yields_none() {
        let code = "local total = 0 for _, row in ipairs(rows) do total = total + row.count end";
        assert_eq!(execute_plot_code(code, &sample_rows()).unwrap(), None);
    }

    #[test]
    fn test_os_is_unreachable() {
        let err = execute_plot_code("plot.bar{ x = {os.time()}, y = {1} }", &sample_rows())
            .unwrap_err();
        assert!(err.0.contains("plot code failed"));
    }

    #[test]
    fn test_io_and_require_are_unreachable() {
        assert!(execute_plot_code("io.open('/etc/passwd')", &sample_rows()).is_err());
        assert!(execute_plot_code("require('socket')", &sample_rows()).is_err());
    }

    #[test]
    fn test_syntax_error_is_visualization_error() {
        let err = execute_plot_code("plot.bar{", &sample_rows()).unwrap_err();
        assert!(err.0.contains("plot code failed"));
    }

    #[test]
    fn test_non_array_axis_rejected() {
        let err = execute_plot_code("plot.line{ x = 'nope', y = {1} }", &sample_rows()).unwrap_err();
        assert!(err.0.contains("axis must be an array"));
    }

    #[test]
    fn test_empty_rows_still_usable() {
        let spec = execute_plot_code("plot.pie{ x = {}, y = {} }", &Vec::new())
            .unwrap()
            .unwrap();
        assert!(spec.x.is_empty());
    }
}
