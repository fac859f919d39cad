pub mod controller;
pub mod events;
pub mod session;
pub mod state;

pub use controller::SessionController;
pub use events::{
    ConversationEvent, ConversationMode, ConversationStatus, DisconnectReason, ErrorKind,
    EventSink, MessageSource, WordTiming,
};
pub use session::{
    DeviceConfig, Feedback, LoopbackConnector, LoopbackSession, SessionConnector, SessionHandle,
};
pub use state::{ConversationFault, ConversationMessage, ConversationState, TranscriptSegment};
