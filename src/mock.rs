//! Degraded mode used when no job-service credentials are configured, or
//! when the service is unreachable at thread creation.
//!
//! Replies come from a fixed keyword table; recommendations are always the
//! static fallback catalog.

use chrono::Utc;

const MOCK_THREAD_PREFIX: &str = "mock-thread-";

const GREETING: &str = "Hello! I'm your AI Construction Assistant. How can I help with your project today?";

const GENERIC: &str = "Thanks for sharing details about your project. I'd be happy to provide specific recommendations for materials and tools. Could you tell me more about what you're trying to accomplish?";

struct CannedReply {
    keywords: &'static [&'static str],
    reply: &'static str,
}

/// First matching row wins.
const REPLIES: &[CannedReply] = &[
    CannedReply {
        keywords: &["bathroom"],
        reply: "For bathroom projects, I recommend using waterproof materials. Make sure to properly seal any tile work and use mold-resistant products. Would you like specific suggestions for your bathroom project?",
    },
    CannedReply {
        keywords: &["kitchen"],
        reply: "Kitchen renovations can be exciting! Consider durable countertops like quartz or granite, and make sure your layout follows the 'work triangle' concept for efficiency. Do you need help with a specific aspect of your kitchen renovation?",
    },
    CannedReply {
        keywords: &["deck", "patio"],
        reply: "Outdoor spaces require materials that can withstand the elements. Pressure-treated lumber, composite decking, or cedar are all good options for decks. What specific outdoor project are you working on?",
    },
    CannedReply {
        keywords: &["paint"],
        reply: "When painting, preparation is key! Make sure to clean walls, fill holes, and use primer for best results. For tools, you'll need quality brushes, rollers, painter's tape, and drop cloths. What are you planning to paint?",
    },
    CannedReply {
        keywords: &["tile"],
        reply: "Tile work rewards careful layout. Plan your spacing, use the right thinset for the surface, and leave time for grout to cure. Are you tiling a floor, a wall, or a backsplash?",
    },
];

/// Canned reply for `message`, matched case-insensitively by substring.
pub fn canned_reply(message: Option<&str>) -> &'static str {
    let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) else {
        return GREETING;
    };
    let lower = message.to_lowercase();
    REPLIES
        .iter()
        .find(|row| row.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|row| row.reply)
        .unwrap_or(GENERIC)
}

/// Synthetic thread id: creation time in milliseconds plus a short random
/// suffix so concurrent sessions do not collide.
pub fn synthetic_thread_id() -> String {
    format!(
        "{MOCK_THREAD_PREFIX}{}-{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

pub fn is_synthetic(thread_id: &str) -> bool {
    thread_id.starts_with(MOCK_THREAD_PREFIX)
}
