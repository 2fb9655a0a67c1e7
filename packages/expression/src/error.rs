use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Possible Case Sensitivity Issue: Expression '{expression}' on segment '{segment}'. Possible you meant '{suggestion}'")]
    CaseSensitivity {
        expression: String,
        segment: String,
        suggestion: String,
    },

    #[error("No reference for '{expression}' in scope '{scope}'")]
    UnknownReference { expression: String, scope: String },
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;
