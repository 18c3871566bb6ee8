use rmcp::ErrorData as McpError;

use crate::jobs::SubmitError;

pub(super) fn map_submit_error(err: SubmitError) -> McpError {
    match err {
        // Backpressure, not caller error: the queue will drain.
        SubmitError::QueueFull { .. } => McpError::internal_error(err.to_string(), None),
    }
}
