use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed MML: unknown command, illegal parameters, trailing text.
    #[error("{0}")]
    Syntax(String),

    /// Semantic violation at command application time.
    #[error("{0}")]
    Command(String),

    /// Framework invariant violation.
    #[error("{0}")]
    Runtime(String),

    /// Framework misuse (invalid engine definition, builder misconfiguration).
    #[error("{0}")]
    Argument(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An error annotated with the source position it was raised at.
    #[error("line {row}, column {col}: {source}\n{line}\n{caret}")]
    Traced {
        row: usize,
        col: usize,
        line: String,
        caret: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should be annotated with a source trace when it
    /// surfaces from parsing or command application.
    pub fn wants_trace(&self) -> bool {
        matches!(self, Error::Syntax(_) | Error::Command(_) | Error::Runtime(_))
    }

    /// Wrap the error with the row/column/snippet of `pos` within `src`.
    ///
    /// Errors that already carry a trace, and kinds that do not take one
    /// (IO, argument), pass through unchanged.
    pub fn with_trace(self, src: &str, pos: usize) -> Error {
        if !self.wants_trace() {
            return self;
        }
        let pos = pos.min(src.len());
        let row = src[..pos].matches('\n').count() + 1;
        let line_start = src[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = src[pos..]
            .find(['\n', '\r'])
            .map(|i| pos + i)
            .unwrap_or(src.len());
        let col = pos - line_start + 1;
        Error::Traced {
            row,
            col,
            line: src[line_start..line_end].to_string(),
            caret: format!("{}^", " ".repeat(col - 1)),
            source: Box::new(self),
        }
    }

    /// Rewrite the row of an existing trace.
    ///
    /// The preprocessor parses directives against single-line cursors; the
    /// resulting trace rows are line-local and are rebased here.
    pub(crate) fn at_row(self, row: usize) -> Error {
        match self {
            Error::Traced {
                col,
                line,
                caret,
                source,
                ..
            } => Error::Traced {
                row,
                col,
                line,
                caret,
                source,
            },
            other => other,
        }
    }
}
