mod abort;
mod shutdown;

pub mod prelude {
    pub use crate::abort::IterationAbortError;
    pub use crate::shutdown::{ShutdownHandle, ShutdownListener, ShutdownSignalError};
}
