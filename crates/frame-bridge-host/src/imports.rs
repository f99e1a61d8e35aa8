//! The host import table.
//!
//! Every function the host offers to the guest is listed here once, with its
//! wasm signature and any legacy alias. [`crate::linker`] registers exactly
//! this table, and the CLI prints it.

use std::fmt;

/// Import module name for every host function.
pub const HOST_MODULE: &str = "env";

/// Import module names provided by WASI preview1.
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// Description of one host function import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSpec {
    /// Import name in [`HOST_MODULE`].
    pub name: &'static str,
    /// Wasm parameter types.
    pub params: &'static [&'static str],
    /// Wasm result types.
    pub results: &'static [&'static str],
    /// Older name the same function is also linked under.
    pub alias: Option<&'static str>,
    /// One-line description.
    pub summary: &'static str,
}

impl ImportSpec {
    /// Returns `true` if `name` is this import's name or alias.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.alias == Some(name)
    }
}

impl fmt::Display for ImportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}({})", HOST_MODULE, self.name, self.params.join(", "))?;
        if !self.results.is_empty() {
            write!(f, " -> {}", self.results.join(", "))?;
        }
        Ok(())
    }
}

/// All host function imports.
pub const IMPORTS: &[ImportSpec] = &[
    ImportSpec {
        name: "puts",
        params: &["i32", "i32"],
        results: &[],
        alias: None,
        summary: "print a UTF-8 string from guest memory",
    },
    ImportSpec {
        name: "now",
        params: &[],
        results: &["f64"],
        alias: Some("performance_now"),
        summary: "milliseconds since the session started",
    },
    ImportSpec {
        name: "event_loop_new",
        params: &[],
        results: &["i32"],
        alias: None,
        summary: "create an event loop subscribed to keyboard input",
    },
    ImportSpec {
        name: "event_loop_raf",
        params: &["i32"],
        results: &["i32"],
        alias: None,
        summary: "arm the next animation frame, 0 if the loop is unknown",
    },
    ImportSpec {
        name: "event_loop_dispose",
        params: &["i32"],
        results: &["i32"],
        alias: None,
        summary: "kill and evict an event loop, 0 if the loop is unknown",
    },
    ImportSpec {
        name: "svg_set_path",
        params: &["i32", "i32"],
        results: &[],
        alias: None,
        summary: "set the path description of the drawable element",
    },
    ImportSpec {
        name: "fill_rand",
        params: &["i32", "i32"],
        results: &["i32"],
        alias: Some("js_fill_rand"),
        summary: "fill guest memory with secure random bytes (0 ok, 1 range, 2 quota)",
    },
];

/// Find the import a guest refers to by `module` and `name`.
pub fn lookup(module: &str, name: &str) -> Option<&'static ImportSpec> {
    if module != HOST_MODULE {
        return None;
    }
    IMPORTS.iter().find(|import| import.matches(name))
}

/// Imports of a guest module that the host will not satisfy.
///
/// WASI imports count as satisfied only when `wasi` is enabled.
pub fn unresolved<'a>(
    imports: impl IntoIterator<Item = &'a (String, String)>,
    wasi: bool,
) -> Vec<&'a (String, String)> {
    imports
        .into_iter()
        .filter(|(module, name)| {
            let provided = lookup(module, name).is_some() || (wasi && module == WASI_MODULE);
            !provided
        })
        .collect()
}
