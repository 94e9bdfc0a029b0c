mod core;
mod transport;

pub use self::core::{Message, Role, completion_stream, completions_url, streaming_client};
pub use transport::{
    CompletionsTransport, FragmentStream, RelayTransport, Transport, Utf8Decoder,
    classify_failure, error_for_status, fragments,
};
