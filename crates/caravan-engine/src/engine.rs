//! Template engine based on MiniJinja

use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};

use caravan_core::{load_file, Values};

use crate::error::{EngineError, Result};
use crate::filters;
use crate::functions;

/// The template engine.
///
/// Holds a configured MiniJinja environment with the fixed helper set.
/// Cluster-bound helpers are registered by the workflow layer through
/// [`Engine::environment_mut`] so that one environment serves every
/// template in a run.
pub struct Engine {
    env: Environment<'static>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with the cluster-free helper set registered
    pub fn new() -> Self {
        let mut env = Environment::new();

        // Chainable lets templates probe optional values without blowing
        // up on the first missing key.
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("snakecase", filters::snakecase);
        env.add_filter("kebabcase", filters::kebabcase);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);

        env.add_function("parseJSON", functions::parse_json);
        env.add_function("readEnv", functions::read_env);
        env.add_function("readFile", functions::read_file);
        env.add_function("console", functions::console);
        env.add_function("fail", functions::fail);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);

        Self { env }
    }

    /// The underlying environment, for registering additional helpers
    pub fn environment_mut(&mut self) -> &mut Environment<'static> {
        &mut self.env
    }

    /// Render a template string against the given values
    pub fn render(&self, name: &str, source: &str, values: &Values) -> Result<String> {
        let ctx = minijinja::Value::from_serialize(&values.0);
        self.env
            .render_str(source, ctx)
            .map_err(|source| EngineError::Render {
                name: name.to_string(),
                source,
            })
    }

    /// Read a file and render it against the given values.
    ///
    /// An empty path renders to nothing, so callers can pass a stage's
    /// optional `template` field straight through.
    pub fn render_file<P: AsRef<Path>>(&self, path: P, values: &Values) -> Result<Vec<u8>> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Vec::new());
        }

        let data = load_file(path)?;
        let source = String::from_utf8_lossy(&data);
        let rendered = self.render(&path.display().to_string(), &source, values)?;
        Ok(rendered.into_bytes())
    }
}
