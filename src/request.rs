//! Trade request records and the requester notification seam.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::picto::{picto_codes_from_link_code, PictoCode};
use crate::types::{QueueError, Significance, TradeKind, TradeOutcome};

/// Largest link code the matchmaking screen accepts.
pub const MAX_LINK_CODE: u32 = 99_999_999;

/// Fixed size of one boxed entity record on the console.
pub const ENTITY_SIZE: usize = 0x104;

/// Validated numeric link code plus its picture-symbol form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCode(u32);

impl LinkCode {
    pub fn new(code: u32) -> Result<Self, QueueError> {
        if code > MAX_LINK_CODE {
            return Err(QueueError::InvalidCode(code));
        }
        Ok(LinkCode(code))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The three symbols the worker enters on console for this code.
    pub fn picto_codes(self) -> [PictoCode; 3] {
        picto_codes_from_link_code(self.0)
    }
}

impl std::fmt::Display for LinkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// Identity of the user who queued the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerInfo {
    pub name: String,
    /// Stable requester id; one pending trade per id at a time.
    pub id: u64,
}

/// In-game identity of a connected trade partner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartnerInfo {
    pub name: String,
    pub display_id: u32,
    pub sync_id: u64,
}

impl PartnerInfo {
    /// An all-zero block means matchmaking produced nobody.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.display_id == 0
    }
}

/// Opaque entity payload as read from or written to console memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameEntity {
    data: Vec<u8>,
}

impl GameEntity {
    pub fn new(data: Vec<u8>) -> Self {
        GameEntity { data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// An empty slot reads back as all zeroes.
    pub fn is_present(&self) -> bool {
        self.data.iter().any(|&b| b != 0)
    }

    /// Content identity used to detect unchanged offers and duplicate captures.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    /// Short hex form of the content hash for log lines.
    pub fn fingerprint(&self) -> String {
        let hash = self.content_hash();
        hash[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Callbacks delivering trade progress to whoever queued the request.
///
/// Implementations must tolerate being called from worker tasks; they never
/// receive transport detail, only user-facing progress.
pub trait TradeNotifier: Send + Sync {
    /// Accepted into the queue at `position` with an estimated wait.
    fn queued(&self, position: usize, eta_minutes: u64) {
        let _ = (position, eta_minutes);
    }
    /// A worker claimed the request and is preparing the console.
    fn initializing(&self, bot: &str) {
        let _ = bot;
    }
    /// The code is entered and the worker is searching for a partner.
    fn searching(&self, bot: &str) {
        let _ = bot;
    }
    /// A partner connected and passed screening.
    fn partner_found(&self, partner: &PartnerInfo) {
        let _ = partner;
    }
    /// Free-form progress line.
    fn message(&self, text: &str) {
        let _ = text;
    }
    /// An entity captured mid-trade (clone sampling, dump forwarding).
    fn entity(&self, entity: &GameEntity, caption: &str) {
        let _ = (entity, caption);
    }
    /// Terminal success, carrying whatever the partner sent.
    fn finished(&self, received: GameEntity) {
        let _ = received;
    }
    /// Terminal failure; called exactly once per abandoned request.
    fn canceled(&self, outcome: TradeOutcome) {
        let _ = outcome;
    }
}

/// A no-op notifier for fallback/distribution entries with no requester.
pub struct SilentNotifier;

impl TradeNotifier for SilentNotifier {}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One queued unit of trade work.
///
/// Shared between the queue and the worker serving it; the atomics track
/// claim state and the single permitted retry.
pub struct TradeRequest {
    pub id: u64,
    pub kind: TradeKind,
    pub significance: Significance,
    pub code: LinkCode,
    /// Payload to send for specific-style trades; absent for clone/dump.
    pub payload: Option<GameEntity>,
    pub trainer: TrainerInfo,
    /// Whether this request participates in barrier rendezvous.
    pub synchronized: bool,
    pub enqueued_at: DateTime<Utc>,
    pub notifier: Arc<dyn TradeNotifier>,
    processing: AtomicBool,
    retried: AtomicBool,
}

impl TradeRequest {
    pub fn new(
        kind: TradeKind,
        significance: Significance,
        code: LinkCode,
        payload: Option<GameEntity>,
        trainer: TrainerInfo,
        synchronized: bool,
        notifier: Arc<dyn TradeNotifier>,
    ) -> Arc<Self> {
        Arc::new(TradeRequest {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            significance,
            code,
            payload,
            trainer,
            synchronized,
            enqueued_at: Utc::now(),
            notifier,
            processing: AtomicBool::new(false),
            retried: AtomicBool::new(false),
        })
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::Release);
    }

    pub fn was_retried(&self) -> bool {
        self.retried.load(Ordering::Acquire)
    }

    pub fn mark_retried(&self) {
        self.retried.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for TradeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("significance", &self.significance)
            .field("code", &self.code)
            .field("trainer", &self.trainer)
            .field("synchronized", &self.synchronized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_code_bounds() {
        assert!(LinkCode::new(0).is_ok());
        assert!(LinkCode::new(MAX_LINK_CODE).is_ok());
        assert_eq!(
            LinkCode::new(MAX_LINK_CODE + 1),
            Err(QueueError::InvalidCode(MAX_LINK_CODE + 1))
        );
    }

    #[test]
    fn link_code_display_pads_to_eight() {
        let code = LinkCode::new(1234).unwrap();
        assert_eq!(code.to_string(), "00001234");
    }

    #[test]
    fn entity_presence_and_hash() {
        let empty = GameEntity::new(vec![0u8; ENTITY_SIZE]);
        assert!(!empty.is_present());

        let mut data = vec![0u8; ENTITY_SIZE];
        data[10] = 7;
        let present = GameEntity::new(data.clone());
        assert!(present.is_present());
        assert_eq!(present.content_hash(), GameEntity::new(data).content_hash());
        assert_ne!(present.content_hash(), empty.content_hash());
        assert_eq!(present.fingerprint().len(), 8);
    }

    #[test]
    fn request_ids_are_unique() {
        let trainer = TrainerInfo {
            name: "ash".into(),
            id: 1,
        };
        let code = LinkCode::new(1).unwrap();
        let a = TradeRequest::new(
            TradeKind::Specific,
            Significance::Normal,
            code,
            None,
            trainer.clone(),
            false,
            Arc::new(SilentNotifier),
        );
        let b = TradeRequest::new(
            TradeKind::Specific,
            Significance::Normal,
            code,
            None,
            trainer,
            false,
            Arc::new(SilentNotifier),
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn retry_flag_latches() {
        let req = TradeRequest::new(
            TradeKind::Specific,
            Significance::Normal,
            LinkCode::new(5).unwrap(),
            None,
            TrainerInfo {
                name: "misty".into(),
                id: 2,
            },
            false,
            Arc::new(SilentNotifier),
        );
        assert!(!req.was_retried());
        req.mark_retried();
        assert!(req.was_retried());
    }

    #[test]
    fn empty_partner_detection() {
        assert!(PartnerInfo::default().is_empty());
        let partner = PartnerInfo {
            name: "brock".into(),
            display_id: 123456,
            sync_id: 42,
        };
        assert!(!partner.is_empty());
    }
}
