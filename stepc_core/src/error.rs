use crate::program::{Ident, Span};
use thiserror::Error;

/// Internal-consistency errors of the lowering.
///
/// These indicate either a defect of an earlier phase
/// or a construct that should have been rejected upstream.
/// They abort the compilation of the whole unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    /// A block was left without successor nor terminal marker.
    #[error("block {0} at {1} has neither a successor nor a terminal marker")]
    Unterminated(String, Span),
    /// A block cannot be reached from the entry block.
    #[error("block {0} at {1} is not reachable from the entry block")]
    Unreachable(String, Span),
    /// A node shape the lowering does not handle.
    #[error("unsupported {0} at {1}")]
    UnsupportedShape(&'static str, Span),
    #[error("unknown identifier {0} at {1}")]
    UnknownIdentifier(Ident, Span),
    #[error("unknown label {0} at {1}")]
    UnknownLabel(Ident, Span),
    #[error("unknown method {0} at {1}")]
    UnknownMethod(Ident, Span),
    #[error("unknown type {0}")]
    UnknownType(Ident),
    #[error("unknown field {0} at {1}")]
    UnknownField(Ident, Span),
    #[error("type {0} has no variant {1}")]
    UnknownVariant(Ident, Ident),
    /// A struct contains itself by value.
    #[error("type {0} contains itself")]
    RecursiveType(Ident),
    /// A goto jumps into a deeper atomic region.
    #[error("goto {0} at {1} enters an atomic region")]
    GotoIntoAtomic(Ident, Span),
    /// The atomic level does not telescope along some path.
    #[error("atomic level of block {0} at {1} is inconsistent")]
    AtomicMismatch(String, Span),
    #[error("call to {callee} at {span} expects {expected} arguments, found {found}")]
    ArityMismatch {
        callee: Ident,
        expected: usize,
        found: usize,
        span: Span,
    },
    /// An edge leads to a block that does not exist.
    #[error("block {0} at {1} transfers to a missing block")]
    MissingTarget(String, Span),
    #[error("symbol {0} is defined more than once")]
    DuplicateSymbol(String),
    /// The dispatch table does not cover every non-entry block exactly once.
    #[error("dispatch table is inconsistent at {0}")]
    IncompleteDispatch(String),
    /// A table is keyed by something that is not a block symbol.
    #[error("table {0} has a key {1} that is not a block")]
    TableKey(&'static str, String),
    /// A join reference is not paired as guard and pattern block.
    #[error("join reference of block {0} at {1} is not paired")]
    JoinPairing(String, Span),
    /// A method or unit needs more slots than the runtime layout indexes.
    #[error("too many {0}")]
    CapacityExceeded(&'static str),
    /// Error in the named method.
    #[error("in method {0}")]
    Method(Ident, #[source] Box<LowerError>),
}

/// Narrows an index to the width of the runtime layout.
pub(crate) fn narrow(idx: usize, what: &'static str) -> Result<u16, LowerError> {
    u16::try_from(idx).map_err(|_| LowerError::CapacityExceeded(what))
}

impl LowerError {
    pub(crate) fn in_method(self, method: &str) -> Self {
        LowerError::Method(method.to_owned(), Box::new(self))
    }
}
