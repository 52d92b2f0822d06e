use thiserror::Error;

/// Main error type for edgeview
#[derive(Error, Debug, Clone)]
pub enum EdgeError {
    /// Malformed or ambiguous shape
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Shape element count does not match the buffer or source view
    #[error("Invalid shape: element count mismatch, expected {expected}, got {actual}")]
    ElementCountMismatch { expected: usize, actual: usize },

    /// Index beyond the bounds of a view
    #[error("Index {index} out of range for bound {bound}")]
    IndexOutOfRange { index: usize, bound: usize },

    /// Operation preconditions violated
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The native engine returned a null handle
    #[error("Native interop failure: {0}")]
    NativeInteropFailure(String),

    /// Queued prediction was never started before shutdown
    #[error("Prediction cancelled")]
    PredictionCancelled,

    /// The wrapped predictor failed while processing a request
    #[error("Prediction failed: {0}")]
    PredictionFailed(#[source] Box<EdgeError>),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EdgeError {
    /// Create a shape error describing the offending shape
    pub fn shape_error(shape: &[isize], reason: &str) -> Self {
        EdgeError::InvalidShape(format!("{} for shape {:?}", reason, shape))
    }

    /// Create an invalid operation error with the operation name
    pub fn operation_error(operation: &str, message: &str) -> Self {
        EdgeError::InvalidOperation(format!("{}: {}", operation, message))
    }

    /// Create an interop error for a native call that returned no handle
    pub fn null_handle(call: &str) -> Self {
        EdgeError::NativeInteropFailure(format!("{} returned a null handle", call))
    }

    /// Wrap an error raised by a predictor on the worker thread
    pub fn prediction_failed(err: EdgeError) -> Self {
        match err {
            EdgeError::PredictionFailed(_) | EdgeError::PredictionCancelled => err,
            other => EdgeError::PredictionFailed(Box::new(other)),
        }
    }
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        EdgeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::SerializationError(err.to_string())
    }
}

/// Result type for edgeview operations
pub type EdgeResult<T> = Result<T, EdgeError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub shapes: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            shapes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.shapes.push(format!("{:?}", shape));
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operation: {}", self.operation);

        if !self.shapes.is_empty() {
            message.push_str(&format!("\nShapes: {}", self.shapes.join(", ")));
        }

        if !self.suggestions.is_empty() {
            message.push_str("\nSuggestions:");
            for suggestion in &self.suggestions {
                message.push_str(&format!("\n  - {}", suggestion));
            }
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> EdgeResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for EdgeResult<T> {
    fn with_context<F>(self, f: F) -> EdgeResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                EdgeError::InvalidShape(msg) => {
                    EdgeError::InvalidShape(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                EdgeError::InvalidOperation(msg) => {
                    EdgeError::InvalidOperation(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidShape,
    IndexOutOfRange,
    InvalidOperation,
    NativeInteropFailure,
    PredictionCancelled,
    PredictionFailed,
    ConfigInvalid,
    IoFailed,
}

impl EdgeError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            EdgeError::InvalidShape(_) => ErrorCode::InvalidShape,
            EdgeError::ElementCountMismatch { .. } => ErrorCode::InvalidShape,
            EdgeError::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            EdgeError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            EdgeError::NativeInteropFailure(_) => ErrorCode::NativeInteropFailure,
            EdgeError::PredictionCancelled => ErrorCode::PredictionCancelled,
            EdgeError::PredictionFailed(_) => ErrorCode::PredictionFailed,
            EdgeError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            EdgeError::IoError(_) => ErrorCode::IoFailed,
            EdgeError::SerializationError(_) => ErrorCode::ConfigInvalid,
        }
    }

    /// Check if this is a shape-class error
    pub fn is_shape_error(&self) -> bool {
        self.code() == ErrorCode::InvalidShape
    }

    /// Check if retrying the same call could succeed.
    /// Shape, index and operation errors are deterministic and never are.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::PredictionCancelled | ErrorCode::IoFailed
        )
    }
}
