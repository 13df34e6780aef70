use super::ProxySession;
use super::status::{ListenerId, SessionStatus, StateChangeListener};
use crate::codec::Codec;
use crate::config::PrimitiveConfig;
use crate::core::{
    ConnectionState, LogIndex, OperationId, OperationKind, PartitionId, PrimitiveName,
    PrimitiveOperation, PrimitiveType, ProxyError, Result, SessionId, WriteIndex,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, broadcast, oneshot};
use tracing::{Instrument, Level, event, info_span};

// Log-replicated sessions are split by concern: collaborator contracts, the
// wire envelope, the replicated service API, replay state and the session.
include!("log/collaborators.rs");
include!("log/envelope.rs");
include!("log/service.rs");
include!("log/replay.rs");
include!("log/session.rs");
