//! The schema keyword vocabulary and its fixed evaluation precedence.
//!
//! A schema mapping is an open bag of keys; this module turns it into a
//! closed set of [`Keyword`]s. The order in which keywords run is
//! [`PRECEDENCE`], independent of declaration order in the document.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Every key the evaluator recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Delay,
    Const,
    Path,
    Store,
    Target,
    Sibling,
    Source,
    Request,
    SchemaFrom,
    Not,
    SelectSet,
    Increment,
    If,
    Then,
    Else,
    Definitions,
    Properties,
    Spread,
    Patch,
    Filter,
    Find,
    Contains,
    Map,
    GroupJoin,
    Select,
    Equals,
    Set,
    Reduce,
    ReduceMany,
    Calc,
    Use,
    Function,
    BindArg,
    Call,
    Computed,
    OnError,
    Finally,
}

/// Order in which step-producing keywords run. Modifier keywords
/// (`then`, `else`, `bindArg`, `computed`, `onError`, `finally`) are read
/// by the step that owns them and never appear here.
pub const PRECEDENCE: &[Keyword] = &[
    Keyword::Delay,
    Keyword::Const,
    Keyword::Path,
    Keyword::Store,
    Keyword::Target,
    Keyword::Sibling,
    Keyword::Source,
    Keyword::Request,
    Keyword::SchemaFrom,
    Keyword::Not,
    Keyword::SelectSet,
    Keyword::Increment,
    Keyword::If,
    Keyword::Definitions,
    Keyword::Properties,
    Keyword::Spread,
    Keyword::Patch,
    Keyword::Filter,
    Keyword::Find,
    Keyword::Contains,
    Keyword::Map,
    Keyword::GroupJoin,
    Keyword::Select,
    Keyword::Equals,
    Keyword::Set,
    Keyword::Reduce,
    Keyword::ReduceMany,
    Keyword::Calc,
    Keyword::Use,
    Keyword::Function,
    Keyword::Call,
];

impl Keyword {
    /// Look up a schema key. Spanish and English spellings are both accepted
    /// where the vocabulary has both.
    pub fn from_key(key: &str) -> Option<Self> {
        let keyword = match key {
            "delay" => Keyword::Delay,
            "const" => Keyword::Const,
            "path" => Keyword::Path,
            "store" => Keyword::Store,
            "target" => Keyword::Target,
            "sibling" => Keyword::Sibling,
            "source" => Keyword::Source,
            "consulta" | "request" => Keyword::Request,
            "schemaFrom" => Keyword::SchemaFrom,
            "not" => Keyword::Not,
            "selectSet" => Keyword::SelectSet,
            "increment" => Keyword::Increment,
            "if" => Keyword::If,
            "then" => Keyword::Then,
            "else" => Keyword::Else,
            "definitions" => Keyword::Definitions,
            "propiedades" | "properties" => Keyword::Properties,
            "spread" => Keyword::Spread,
            "patch" => Keyword::Patch,
            "filter" => Keyword::Filter,
            "find" => Keyword::Find,
            "contains" => Keyword::Contains,
            "map" => Keyword::Map,
            "groupJoin" => Keyword::GroupJoin,
            "select" => Keyword::Select,
            "equals" => Keyword::Equals,
            "set" => Keyword::Set,
            "reduce" => Keyword::Reduce,
            "reduceMany" => Keyword::ReduceMany,
            "calc" => Keyword::Calc,
            "use" => Keyword::Use,
            "function" => Keyword::Function,
            "bindArg" => Keyword::BindArg,
            "call" => Keyword::Call,
            "computed" => Keyword::Computed,
            "onError" => Keyword::OnError,
            "finally" => Keyword::Finally,
            _ => return None,
        };
        Some(keyword)
    }

    /// Keys under which this keyword may appear in a schema, canonical first.
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            Keyword::Delay => &["delay"],
            Keyword::Const => &["const"],
            Keyword::Path => &["path"],
            Keyword::Store => &["store"],
            Keyword::Target => &["target"],
            Keyword::Sibling => &["sibling"],
            Keyword::Source => &["source"],
            Keyword::Request => &["consulta", "request"],
            Keyword::SchemaFrom => &["schemaFrom"],
            Keyword::Not => &["not"],
            Keyword::SelectSet => &["selectSet"],
            Keyword::Increment => &["increment"],
            Keyword::If => &["if"],
            Keyword::Then => &["then"],
            Keyword::Else => &["else"],
            Keyword::Definitions => &["definitions"],
            Keyword::Properties => &["propiedades", "properties"],
            Keyword::Spread => &["spread"],
            Keyword::Patch => &["patch"],
            Keyword::Filter => &["filter"],
            Keyword::Find => &["find"],
            Keyword::Contains => &["contains"],
            Keyword::Map => &["map"],
            Keyword::GroupJoin => &["groupJoin"],
            Keyword::Select => &["select"],
            Keyword::Equals => &["equals"],
            Keyword::Set => &["set"],
            Keyword::Reduce => &["reduce"],
            Keyword::ReduceMany => &["reduceMany"],
            Keyword::Calc => &["calc"],
            Keyword::Use => &["use"],
            Keyword::Function => &["function"],
            Keyword::BindArg => &["bindArg"],
            Keyword::Call => &["call"],
            Keyword::Computed => &["computed"],
            Keyword::OnError => &["onError"],
            Keyword::Finally => &["finally"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.keys()[0]
    }

    /// Keywords that only operate on sequences.
    pub fn is_array_operation(&self) -> bool {
        matches!(
            self,
            Keyword::Filter
                | Keyword::Find
                | Keyword::Contains
                | Keyword::Map
                | Keyword::GroupJoin
                | Keyword::Select
                | Keyword::Patch
        )
    }

    /// Keywords that need a suspension point and are deferred in a
    /// synchronous build.
    pub fn is_async_only(&self) -> bool {
        matches!(self, Keyword::Delay | Keyword::Request)
    }

    /// Fetch this keyword's argument from a schema mapping, honoring aliases.
    pub fn lookup<'s>(&self, node: &'s Map<String, Value>) -> Option<&'s Value> {
        self.keys().iter().find_map(|key| node.get(*key))
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with schema keys outside the vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    /// Skip unknown keys (logged at debug level).
    #[default]
    Ignore,
    /// Fail the node with `ValidationFailed`.
    Reject,
}

/// Evaluation limits and policies carried by every context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalOptions {
    #[serde(default)]
    pub unknown_keys: UnknownKeyPolicy,

    /// Maximum nesting of child evaluations before failing.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Default nesting limit. Each level is a stack frame chain in both
/// evaluators, so the limit stays well inside a 2 MiB thread stack.
pub const DEFAULT_MAX_DEPTH: usize = 64;

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            unknown_keys: UnknownKeyPolicy::default(),
            max_depth: default_max_depth(),
        }
    }
}

/// Keys of `node` that are not part of the vocabulary.
pub fn unknown_keys(node: &Map<String, Value>) -> Vec<&str> {
    node.keys()
        .map(String::as_str)
        .filter(|key| Keyword::from_key(key).is_none())
        .collect()
}

/// Apply the unknown-key policy to a schema mapping.
pub fn check_keys(node: &Map<String, Value>, policy: UnknownKeyPolicy) -> Result<()> {
    let unknown = unknown_keys(node);
    if unknown.is_empty() {
        return Ok(());
    }
    match policy {
        UnknownKeyPolicy::Ignore => {
            tracing::debug!(keys = ?unknown, "Ignoring unknown schema keys");
            Ok(())
        }
        UnknownKeyPolicy::Reject => Err(Error::validation(format!(
            "unknown schema keys: {}",
            unknown.join(", ")
        ))),
    }
}
