//! The workflow's template surface
//!
//! One renderer serves every template in a run (the workflow document,
//! value files, stage inputs), so all of them see the same helper set:
//! the engine's generic helpers plus the cluster-bound lookups wired
//! here.

use std::future::Future;
use std::path::Path;

use minijinja::{Error as TemplateError, ErrorKind};

use caravan_core::{head_commit, Values};
use caravan_engine::Engine;
use caravan_kube::K8s;

use crate::error::Result;

/// Renders templates with the full helper surface
pub struct Renderer {
    engine: Engine,
}

impl Renderer {
    /// Build a renderer; cluster lookups (`fromConfigMap`, `fromSecret`)
    /// are only registered when a connection is available
    pub fn new(k8s: Option<K8s>) -> Self {
        let mut engine = Engine::new();
        let env = engine.environment_mut();

        env.add_function("getCommit", |path: String| {
            head_commit(&path).map_err(to_template_error)
        });

        env.add_function("getDigest", |reference: String| {
            wait_for(caravan_registry::fetch_digest(&reference)).map_err(to_template_error)
        });

        if let Some(k8s) = k8s {
            let client = k8s.clone();
            env.add_function(
                "fromConfigMap",
                move |name: String, namespace: String, key: String| {
                    wait_for(client.from_config_map(&name, &namespace, &key))
                        .map_err(to_template_error)
                },
            );

            let client = k8s;
            env.add_function(
                "fromSecret",
                move |name: String, namespace: String, key: String| {
                    wait_for(client.from_secret(&name, &namespace, &key))
                        .map_err(to_template_error)
                },
            );
        }

        Self { engine }
    }

    /// Render a template string against the given values
    pub fn render(&self, name: &str, source: &str, values: &Values) -> Result<String> {
        Ok(self.engine.render(name, source, values)?)
    }

    /// Render a file against the given values; an empty path renders to
    /// nothing
    pub fn render_file<P: AsRef<Path>>(&self, path: P, values: &Values) -> Result<Vec<u8>> {
        Ok(self.engine.render_file(path, values)?)
    }
}

/// Bridge an async lookup into a synchronous template callback.
///
/// Template functions run inside a worker task on the multi-threaded
/// runtime; block_in_place keeps the executor healthy while the lookup
/// completes.
fn wait_for<F: Future>(future: F) -> F::Output {
    let handle = tokio::runtime::Handle::current();
    tokio::task::block_in_place(|| handle.block_on(future))
}

fn to_template_error<E: std::fmt::Display>(err: E) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, err.to_string())
}
