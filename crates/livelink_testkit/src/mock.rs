//! In-memory mock adapter.
//!
//! Records live in per-type tables with integer ids. Every call is counted
//! and write payloads are recorded, so tests can assert on exactly what the
//! connector sent.

use async_trait::async_trait;
use livelink_core::{
    Adapter, AdapterResult, EntityId, Filter, InterfaceError, PageRequest, RawPage, RawRecord, ID_KEY,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

/// Adapter operations, for counters and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MockOp {
    /// `load_entity`
    LoadEntity,
    /// `load_collection`
    LoadCollection,
    /// `load_collection_page`
    LoadPage,
    /// `create_entity`
    Create,
    /// `save_entity`
    Save,
    /// `delete_entity`
    Delete,
    /// `authenticate`
    Authenticate,
    /// `authenticated`
    Authenticated,
    /// `logout`
    Logout,
}

#[derive(Debug)]
struct Failure {
    error: InterfaceError,
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MockState {
    tables: BTreeMap<String, BTreeMap<EntityId, RawRecord>>,
    next_id: i64,
    calls: BTreeMap<MockOp, u32>,
    failures: BTreeMap<MockOp, Failure>,
    payloads: BTreeMap<MockOp, Vec<RawRecord>>,
    users: BTreeMap<String, (String, RawRecord)>,
    session: Option<RawRecord>,
    clears: u32,
}

/// An in-memory [`Adapter`].
#[derive(Debug, Default)]
pub struct MockAdapter {
    state: Mutex<MockState>,
    diff: bool,
    latency: Option<Duration>,
}

impl MockAdapter {
    /// Creates an empty full-record adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches the adapter to diff mode.
    pub fn with_diff(mut self) -> Self {
        self.diff = true;
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds a user that `authenticate` accepts.
    ///
    /// Without users the authentication calls keep the default 501.
    pub fn with_user(self, login: &str, password: &str, record: RawRecord) -> Self {
        self.state
            .lock()
            .users
            .insert(login.to_string(), (password.to_string(), record));
        self
    }

    /// Seeds a record and returns its id.
    pub fn insert(&self, entity_type: &str, mut record: RawRecord) -> EntityId {
        let mut state = self.state.lock();
        let id = match record.get(ID_KEY).and_then(EntityId::from_value) {
            Some(id) => id,
            None => {
                state.next_id += 1;
                EntityId::Int(state.next_id)
            }
        };
        if let EntityId::Int(n) = id {
            state.next_id = state.next_id.max(n);
        }
        record.insert(ID_KEY.to_string(), id.to_value());
        state
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.clone(), record);
        id
    }

    /// Returns the stored record.
    pub fn record(&self, entity_type: &str, id: impl Into<EntityId>) -> Option<RawRecord> {
        let id = id.into();
        self.state
            .lock()
            .tables
            .get(entity_type)
            .and_then(|t| t.get(&id))
            .cloned()
    }

    /// Removes a record behind the connector's back.
    pub fn remove(&self, entity_type: &str, id: impl Into<EntityId>) -> Option<RawRecord> {
        let id = id.into();
        self.state
            .lock()
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.remove(&id))
    }

    /// Returns the number of stored records of `entity_type`.
    pub fn len(&self, entity_type: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(entity_type)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if no record of `entity_type` is stored.
    pub fn is_empty(&self, entity_type: &str) -> bool {
        self.len(entity_type) == 0
    }

    /// Fails the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: MockOp, error: InterfaceError, times: u32) {
        self.state.lock().failures.insert(
            op,
            Failure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Fails every call of `op` with `error`.
    pub fn always_fail(&self, op: MockOp, error: InterfaceError) {
        self.state.lock().failures.insert(
            op,
            Failure {
                error,
                remaining: None,
            },
        );
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        self.state.lock().failures.clear();
    }

    /// Returns how often `op` was called.
    pub fn calls(&self, op: MockOp) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Returns the payloads received by writes of kind `op`, oldest first.
    pub fn payloads(&self, op: MockOp) -> Vec<RawRecord> {
        self.state
            .lock()
            .payloads
            .get(&op)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the last payload received by `op`.
    pub fn last_payload(&self, op: MockOp) -> Option<RawRecord> {
        self.state
            .lock()
            .payloads
            .get(&op)
            .and_then(|p| p.last().cloned())
    }

    /// Returns how often `clear` was called.
    pub fn clears(&self) -> u32 {
        self.state.lock().clears
    }

    async fn enter(&self, op: MockOp) -> AdapterResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        let (result, exhausted) = match state.failures.get_mut(&op) {
            None => return Ok(()),
            Some(failure) => match failure.remaining.as_mut() {
                None => (Err(failure.error.clone()), false),
                Some(0) => (Ok(()), true),
                Some(n) => {
                    *n -= 1;
                    (Err(failure.error.clone()), *n == 0)
                }
            },
        };
        if exhausted {
            state.failures.remove(&op);
        }
        result
    }

    fn record_payload(&self, op: MockOp, payload: &RawRecord) {
        self.state
            .lock()
            .payloads
            .entry(op)
            .or_default()
            .push(payload.clone());
    }

    fn matching(&self, entity_type: &str, filter: &Filter) -> Vec<RawRecord> {
        self.state
            .lock()
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .iter()
                    .filter(|(id, row)| filter.matches_attributes(row, Some(*id)))
                    .map(|(_, row)| row.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn uses_diff(&self) -> bool {
        self.diff
    }

    async fn load_entity(&self, entity_type: &str, id: &EntityId) -> AdapterResult<Option<RawRecord>> {
        self.enter(MockOp::LoadEntity).await?;
        Ok(self
            .state
            .lock()
            .tables
            .get(entity_type)
            .and_then(|t| t.get(id))
            .cloned())
    }

    async fn load_collection(&self, entity_type: &str, filter: &Filter) -> AdapterResult<Vec<RawRecord>> {
        self.enter(MockOp::LoadCollection).await?;
        Ok(self.matching(entity_type, filter))
    }

    async fn load_collection_page(
        &self,
        entity_type: &str,
        filter: &Filter,
        page: &PageRequest,
    ) -> AdapterResult<RawPage> {
        self.enter(MockOp::LoadPage).await?;
        let rows = self.matching(entity_type, filter);
        let total = rows.len() as u64;
        let start = page.offset as usize + page.page.saturating_sub(1) as usize * page.range as usize;
        let rows = rows.into_iter().skip(start).take(page.range as usize).collect();
        Ok(RawPage::from_rows(rows).with_total(total))
    }

    async fn create_entity(&self, entity_type: &str, data: RawRecord) -> AdapterResult<RawRecord> {
        self.enter(MockOp::Create).await?;
        self.record_payload(MockOp::Create, &data);
        let mut record = data;
        record.remove(ID_KEY);
        let id = self.insert(entity_type, record);
        self.record(entity_type, id)
            .ok_or_else(|| InterfaceError::terminal(500, "record vanished"))
    }

    async fn save_entity(&self, data: RawRecord, entity_type: &str, id: &EntityId) -> AdapterResult<RawRecord> {
        self.enter(MockOp::Save).await?;
        self.record_payload(MockOp::Save, &data);
        let mut state = self.state.lock();
        let row = state
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| InterfaceError::not_found(format!("{entity_type} {id} not found")))?;
        for (key, value) in data {
            if key != ID_KEY {
                row.insert(key, value);
            }
        }
        Ok(row.clone())
    }

    async fn delete_entity(&self, entity_type: &str, id: &EntityId) -> AdapterResult<bool> {
        self.enter(MockOp::Delete).await?;
        Ok(self
            .state
            .lock()
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.remove(id))
            .is_some())
    }

    async fn authenticate(&self, login: &str, password: &str) -> AdapterResult<RawRecord> {
        self.enter(MockOp::Authenticate).await?;
        let mut state = self.state.lock();
        if state.users.is_empty() {
            return Err(InterfaceError::unsupported("authenticate"));
        }
        let user = match state.users.get(login) {
            Some((expected, record)) if expected == password => record.clone(),
            _ => return Err(InterfaceError::terminal(401, "invalid credentials")),
        };
        state.session = Some(user.clone());
        Ok(user)
    }

    async fn authenticated(&self) -> AdapterResult<RawRecord> {
        self.enter(MockOp::Authenticated).await?;
        let state = self.state.lock();
        if state.users.is_empty() {
            return Err(InterfaceError::unsupported("authenticated"));
        }
        state
            .session
            .clone()
            .ok_or_else(|| InterfaceError::terminal(401, "no session"))
    }

    async fn logout(&self) -> AdapterResult<bool> {
        self.enter(MockOp::Logout).await?;
        let mut state = self.state.lock();
        if state.users.is_empty() {
            return Err(InterfaceError::unsupported("logout"));
        }
        Ok(state.session.take().is_some())
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.session = None;
        state.clears += 1;
    }
}
