//! Запись сессии: текущее состояние и архив предыдущих
//!
//! ```text
//! promote_state(new)
//!
//!   current ──(pending prekey очищен)──▶ previous[0]
//!   new     ──────────────────────────▶ current
//!   previous[ARCHIVED_STATES_MAX_LENGTH..] вытесняются
//! ```

use std::time::SystemTime;

use tracing::debug;

use crate::config::Config;
use crate::crypto::messaging::session_state::{SessionState, SessionUsabilityRequirements};
use crate::error::{ProtocolError, Result};
use crate::protocol::codec::ProtoMessage;
use crate::protocol::structures::RecordStructure;

#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    previous_sessions: Vec<SessionState>,
}

impl SessionRecord {
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current_session: Some(state),
            previous_sessions: Vec::new(),
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let record = RecordStructure::decode(bytes)?;
        Ok(Self {
            current_session: record.current_session.map(SessionState::from_structure),
            previous_sessions: record
                .previous_sessions
                .into_iter()
                .map(SessionState::from_structure)
                .collect(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        RecordStructure {
            current_session: self.current_session.as_ref().map(|s| s.structure().clone()),
            previous_sessions: self
                .previous_sessions
                .iter()
                .map(|s| s.structure().clone())
                .collect(),
        }
        .encode()
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    /// Заменить текущее состояние без архивации
    pub fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    pub fn previous_session_states(&self) -> impl ExactSizeIterator<Item = &SessionState> {
        self.previous_sessions.iter()
    }

    pub fn has_usable_sender_chain(
        &self,
        now: SystemTime,
        requirements: SessionUsabilityRequirements,
    ) -> Result<bool> {
        match &self.current_session {
            Some(state) => state.has_usable_sender_chain(now, requirements),
            None => Ok(false),
        }
    }

    /// Есть ли (текущее или архивное) состояние с такой версией и base key
    pub fn has_session_state(&self, version: u8, alice_base_key: &[u8]) -> Result<bool> {
        for state in self.current_session.iter().chain(self.previous_sessions.iter()) {
            if state.session_version()? == version && state.alice_base_key() == alice_base_key {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn archive_current_state(&mut self) {
        let Some(mut current) = self.current_session.take() else {
            debug!(target: "crypto::session_record", "Skipping archive, no current session");
            return;
        };
        // архивная сессия никогда не ждёт подтверждения
        current.clear_unacknowledged_pre_key_message();
        self.previous_sessions.insert(0, current);

        let max_archived = Config::global().archived_states_max_length;
        if self.previous_sessions.len() > max_archived {
            debug!(
                target: "crypto::session_record",
                max_archived,
                "Evicting oldest archived session"
            );
            self.previous_sessions.truncate(max_archived);
        }
    }

    pub fn promote_state(&mut self, new_state: SessionState) {
        self.archive_current_state();
        self.current_session = Some(new_state);
    }

    /// Вернуть архивное состояние (уже обновлённое) в текущие
    pub fn promote_old_session(&mut self, old_session: usize, updated_state: SessionState) -> Result<()> {
        if old_session >= self.previous_sessions.len() {
            return Err(ProtocolError::InvalidSession(format!(
                "no archived session at index {}",
                old_session
            )));
        }
        self.previous_sessions.remove(old_session);
        self.promote_state(updated_state);
        Ok(())
    }

    pub fn local_registration_id(&self) -> Result<u32> {
        self.current_session
            .as_ref()
            .map(SessionState::local_registration_id)
            .ok_or_else(|| ProtocolError::InvalidSession("no current session".to_string()))
    }

    pub fn remote_registration_id(&self) -> Result<u32> {
        self.current_session
            .as_ref()
            .map(SessionState::remote_registration_id)
            .ok_or_else(|| ProtocolError::InvalidSession("no current session".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{IdentityKeyPair, KeyPair};
    use crate::crypto::messaging::ratchet_keys::{ChainKey, RootKey};
    use crate::utils::time;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pending_state(rng: &mut StdRng, registration_id: u32) -> SessionState {
        let ours = IdentityKeyPair::generate(rng);
        let theirs = IdentityKeyPair::generate(rng);
        let base = KeyPair::generate(rng);
        let mut state = SessionState::new(
            4,
            ours.identity_key(),
            theirs.identity_key(),
            &RootKey::new([1u8; 32]),
            &base.public_key,
        );
        state.set_sender_chain(&base, &ChainKey::new([2u8; 32], 0));
        state.set_unacknowledged_pre_key_message(
            Some(1),
            2,
            &base.public_key,
            time::from_millis(1_700_000_000_000),
        );
        state.set_remote_registration_id(registration_id);
        state
    }

    #[test]
    fn test_promote_caps_archive_and_clears_pending() {
        let mut rng = StdRng::seed_from_u64(40);
        let mut record = SessionRecord::new_fresh();
        for i in 0..45 {
            record.promote_state(pending_state(&mut rng, i));
        }

        assert_eq!(record.previous_session_states().len(), 40);
        for state in record.previous_session_states() {
            assert!(state.unacknowledged_pre_key_message_items().unwrap().is_none());
        }
        // новейший архив в начале
        let newest = record.previous_session_states().next().unwrap();
        assert_eq!(newest.remote_registration_id(), 43);
        assert_eq!(record.remote_registration_id().unwrap(), 44);
        assert!(record
            .session_state()
            .unwrap()
            .unacknowledged_pre_key_message_items()
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_empty_record_is_unusable() {
        let record = SessionRecord::new_fresh();
        assert!(!record
            .has_usable_sender_chain(SystemTime::now(), SessionUsabilityRequirements::NONE)
            .unwrap());
        assert!(record.local_registration_id().is_err());
    }

    #[test]
    fn test_promote_old_session() {
        let mut rng = StdRng::seed_from_u64(41);
        let mut record = SessionRecord::new_fresh();
        for i in 0..3 {
            record.promote_state(pending_state(&mut rng, i));
        }
        let old = record.previous_session_states().nth(1).unwrap().clone();
        assert_eq!(old.remote_registration_id(), 0);

        record.promote_old_session(1, old).unwrap();
        assert_eq!(record.remote_registration_id().unwrap(), 0);
        let archived: Vec<u32> = record
            .previous_session_states()
            .map(SessionState::remote_registration_id)
            .collect();
        assert_eq!(archived, vec![2, 1]);
        assert!(record.promote_old_session(5, pending_state(&mut rng, 9)).is_err());
    }

    #[test]
    fn test_record_serialization_and_lookup() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut record = SessionRecord::new_fresh();
        let first = pending_state(&mut rng, 1);
        let base_key = first.alice_base_key().to_vec();
        record.promote_state(first);
        record.promote_state(pending_state(&mut rng, 2));

        let restored = SessionRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(restored.previous_session_states().len(), 1);
        assert!(restored.has_session_state(4, &base_key).unwrap());
        assert!(!restored.has_session_state(3, &base_key).unwrap());
        assert!(!restored.has_session_state(4, &[0u8; 32]).unwrap());
    }
}
