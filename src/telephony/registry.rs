//! # Session Registry Actor
//!
//! The process-wide map from call id to the socket connection that owns it.
//! The actor's mailbox is the only writer, so registration is serialized
//! without a lock.

use actix::prelude::*;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("call {0} already has an active session")]
    Duplicate(String),

    #[error("registry is at capacity ({0} active calls)")]
    AtCapacity(usize),
}

/// Claim a call id for one connection.
#[derive(Message)]
#[rtype(result = "Result<(), RegistryError>")]
pub struct Register {
    pub call_id: String,
    pub connection: Uuid,
}

/// Release a call id. Only the owning connection's entry is removed.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct Unregister {
    pub call_id: String,
    pub connection: Uuid,
}

/// Call ids currently registered, sorted.
#[derive(Message)]
#[rtype(result = "Vec<String>")]
pub struct ActiveCalls;

pub struct SessionRegistry {
    sessions: HashMap<String, Uuid>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity,
        }
    }
}

impl Actor for SessionRegistry {
    type Context = Context<Self>;
}

impl Handler<Register> for SessionRegistry {
    type Result = Result<(), RegistryError>;

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) -> Self::Result {
        if self.sessions.contains_key(&msg.call_id) {
            warn!(call_id = %msg.call_id, "Rejected duplicate session");
            return Err(RegistryError::Duplicate(msg.call_id));
        }
        if self.sessions.len() >= self.capacity {
            warn!(call_id = %msg.call_id, capacity = self.capacity, "Rejected session, registry full");
            return Err(RegistryError::AtCapacity(self.capacity));
        }
        debug!(call_id = %msg.call_id, connection = %msg.connection, "Session registered");
        self.sessions.insert(msg.call_id, msg.connection);
        Ok(())
    }
}

impl Handler<Unregister> for SessionRegistry {
    type Result = bool;

    fn handle(&mut self, msg: Unregister, _ctx: &mut Self::Context) -> Self::Result {
        match self.sessions.get(&msg.call_id) {
            Some(owner) if *owner == msg.connection => {
                self.sessions.remove(&msg.call_id);
                debug!(call_id = %msg.call_id, "Session unregistered");
                true
            }
            _ => false,
        }
    }
}

impl Handler<ActiveCalls> for SessionRegistry {
    type Result = MessageResult<ActiveCalls>;

    fn handle(&mut self, _msg: ActiveCalls, _ctx: &mut Self::Context) -> Self::Result {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        MessageResult(ids)
    }
}
