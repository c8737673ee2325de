/// Inbound event type tags as sent by the realtime transport
pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_MESSAGE_RECALLED: &str = "message:recalled";
pub const EVENT_MESSAGE_EDITED: &str = "message:edited";
pub const EVENT_REACTION_UPDATED: &str = "reaction:updated";
pub const EVENT_READ_RECEIPT: &str = "read:receipt";
pub const EVENT_TYPING_UPDATE: &str = "typing:update";
pub const EVENT_GROUP_UPDATED: &str = "group:updated";
pub const EVENT_MEMBER_KICKED: &str = "member:kicked";
pub const EVENT_MEMBER_LEFT: &str = "member:left";

/// Named conversation counters
pub const COUNTER_TOTAL_MESSAGES: &str = "totalMessages";
pub const COUNTER_SHARED_IMAGES: &str = "sharedImages";
pub const COUNTER_SHARED_VIDEOS: &str = "sharedVideos";
pub const COUNTER_SHARED_FILES: &str = "sharedFiles";
pub const COUNTER_SHARED_LINKS: &str = "sharedLinks";

/// Number of members in a direct conversation
pub const DIRECT_MEMBER_COUNT: usize = 2;

/// Default history page size
pub const DEFAULT_PAGE_SIZE: u16 = 30;

/// Hard cap on a single history page
pub const MAX_PAGE_SIZE: u16 = 100;

/// Window in which an unmatched server ack may still be paired with a pending
/// message by sender, content and send time (milliseconds)
pub const DEFAULT_DEDUPE_WINDOW_MS: u64 = 10_000;

/// How long a typing indicator stays visible without a refresh (milliseconds)
pub const DEFAULT_TYPING_TTL_MS: u64 = 6_000;

/// Maximum number of messages kept per conversation timeline
pub const DEFAULT_MAX_TIMELINE_ITEMS: usize = 500;
