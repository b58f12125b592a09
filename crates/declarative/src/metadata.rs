//! Node metadata keys written by the loader and transforms

/// Resource kind of the node
pub const KIND: &str = "kind";

/// Block name
pub const NAME: &str = "name";

/// Declaration index within the parent
pub const ORDER: &str = "order";

/// Parameter table supplied to a module (or to the root by the caller)
pub const PARAMS: &str = "params";

/// Location a module or the root was loaded from
pub const SOURCE: &str = "source";

/// Lock name the node runs under
pub const LOCK: &str = "lock";

/// Nearest enclosing `case` of a conditional node
pub const CONDITIONAL_CASE: &str = "conditional-case";

/// Predicate template of a `case` node
pub const PREDICATE: &str = "predicate";

/// Set on lookup targets and their ancestors; such nodes are never merged
pub const REFERENCED: &str = "referenced";
