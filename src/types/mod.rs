pub mod conversation;
pub mod events;
pub mod message;
pub mod presence;

pub use conversation::{
    Conversation, ConversationFilter, ConversationId, ConversationKind, ConversationStatus,
};
pub use message::{
    Attachment, AttachmentKind, AttachmentStatus, Message, MessageId, ReplyPreview, SendState,
    UserId,
};
pub use presence::{ReadReceipt, TypingSignal, Typist};
