//! Error types.
//!
//! Structural problems in a feature model are reported while building it,
//! so every later stage can assume a well-formed tree. Solver errors are
//! reported per clause set and are logged by the calculator rather than
//! aborting a run.

/// A structural error in a feature model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown relation `{0}`")]
    UnknownRelation(String),

    #[error("unknown cross-tree constraint relation `{0}`")]
    UnknownConstraintRelation(String),

    #[error("unknown hardware class `{0}`")]
    UnknownHardwareClass(String),

    #[error("feature `{0}` is defined more than once")]
    DuplicateFeature(String),

    #[error("feature `{feature}` refers to unknown parent `{parent}`")]
    MissingParent { feature: String, parent: String },

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("feature `{0}` mixes abstract and concrete children")]
    MixedChildren(String),

    #[error("feature `{0}` has a group with fewer than two alternative/or members")]
    UndersizedGroup(String),

    #[error("feature `{0}` has a group mixing alternative/or with other relations")]
    MixedGroup(String),

    #[error("feature `{0}` has a single concrete child that is not mandatory")]
    ConcreteChildArity(String),

    #[error("feature `{0}` is part of a parent cycle")]
    ParentCycle(String),

    #[error("feature name `{0}` cannot be written to configuration files")]
    ReservedName(String),

    #[error("root feature cannot be redefined")]
    RootRedefined,

    #[error("malformed feature model json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read feature model: {0}")]
    Io(#[from] std::io::Error),
}

/// An error while registering clauses with, or running, a solver.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("empty clause cannot be registered")]
    EmptyClause,

    #[error("literal {literal} refers to variable outside 1..={num_vars}")]
    UnknownVariable { literal: i32, num_vars: u32 },
}

/// An error while reading configuration interchange data.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: unknown feature `{name}`")]
    UnknownFeature { line: usize, name: String },
}
