pub mod context;
pub mod conversation;
pub mod entity;
pub mod preferences;
pub mod privacy;
pub mod search;

pub use context::{ConversationContext, ConversationSummary};
pub use conversation::{Conversation, ConversationMetadata, Message, MessageExchange, MessageRole};
pub use entity::{Entity, EntityKind, EntityMetadata, IntegrityRecord, ListFilter, CHECKSUM_ALGORITHM};
pub use preferences::{CommunicationPreferences, ResponseStyle, ResponseStyleType, UserPreferences, KNOWN_TONES};
pub use privacy::{DataRetentionPolicy, DeleteOptions, DeleteScope, PrivacyMode, PrivacySettings, UserDataExport};
pub use search::{DateRange, SearchQuery, SearchResult};
