//! Variable binding set and the reserved request-input namespace

use serde_json::Value;

/// Variable binding set: name → JSON value (object ordering preserved)
pub type Bindings = serde_json::Map<String, Value>;

/// Reserved top-level binding holding externally-sourced request inputs
pub const SYS_VAR: &str = "sysvar";

/// Externally-sourced read-only inputs, supplied once at construction.
///
/// These populate the reserved `sysvar` namespace: `{$sysvar.get.page}`,
/// `{$sysvar.server.request_method}`, `{$sysvar.const.version}` and so on.
/// The core never refreshes them mid-render.
#[derive(Debug, Clone, Default)]
pub struct RequestInputs {
    /// Query-string parameters
    pub get: Bindings,
    /// Form fields
    pub post: Bindings,
    /// Merged request parameters
    pub request: Bindings,
    /// Cookies
    pub cookie: Bindings,
    /// Server/environment metadata (keys are lower-cased on ingestion)
    pub server: Bindings,
    /// Session snapshot, if any
    pub session: Bindings,
    /// User-defined constant definitions (keys are lower-cased on ingestion)
    pub constants: Bindings,
}

impl RequestInputs {
    /// Build the `sysvar` value installed into the binding set
    fn into_sysvar(self) -> Value {
        let mut sys = Bindings::new();
        sys.insert("get".into(), Value::Object(self.get));
        sys.insert("post".into(), Value::Object(self.post));
        sys.insert("request".into(), Value::Object(self.request));
        sys.insert("cookie".into(), Value::Object(self.cookie));
        sys.insert("server".into(), Value::Object(lower_keys(self.server)));
        sys.insert("session".into(), Value::Object(self.session));
        sys.insert("const".into(), Value::Object(lower_keys(self.constants)));
        Value::Object(sys)
    }
}

fn lower_keys(map: Bindings) -> Bindings {
    map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

/// Caller-facing variable container.
///
/// Mutated only through [`VarStore::assign`]; `sysvar` is populated once at
/// construction and assignments to it are ignored rather than merged.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    vars: Bindings,
}

impl VarStore {
    /// Create a store with the reserved namespace installed
    pub fn new(inputs: RequestInputs) -> Self {
        let mut vars = Bindings::new();
        vars.insert(SYS_VAR.to_string(), inputs.into_sysvar());
        Self { vars }
    }

    /// Bind one variable. Re-binding `sysvar` is refused.
    pub fn assign<V: Into<Value>>(&mut self, name: &str, value: V) {
        if name == SYS_VAR {
            tracing::warn!("ignoring assignment to reserved variable `{}`", SYS_VAR);
            return;
        }
        self.vars.insert(name.to_string(), value.into());
    }

    /// Bind every entry of `map` (reserved key excluded)
    pub fn assign_map(&mut self, map: Bindings) {
        for (name, value) in map {
            self.assign(&name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The full binding set, as handed to the executor
    pub fn bindings(&self) -> &Bindings {
        &self.vars
    }
}
