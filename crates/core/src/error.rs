use crate::order::{MissingItem, OrderStatus};
use crate::store::StoreError;
use orderly_ids::ShardableUuid;
use std::fmt;

/// A record the core looked up and could not find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Order(ShardableUuid),
    Facility(u64),
    Patient(u64),
    Signer(u64),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Order(id) => write!(f, "order {id}"),
            Resource::Facility(id) => write!(f, "facility {id}"),
            Resource::Patient(id) => write!(f, "patient {id}"),
            Resource::Signer(id) => write!(f, "signer {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("order cannot be edited in status {0}")]
    OrderNotEditable(OrderStatus),
    #[error("signer {signer} is not the requesting signer of order {order}")]
    NotAuthorizedSigner { order: ShardableUuid, signer: u64 },
    #[error("order is incomplete: {}", join_missing(.0))]
    IncompleteOrder(Vec<MissingItem>),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("too many failed authentication attempts")]
    TooManyAttempts,
    #[error("invalid or expired session")]
    InvalidSession,
    #[error("too many orders in batch: {count} (maximum {max})")]
    TooManyOrders { count: usize, max: usize },
    #[error("{0} not found")]
    NotFound(Resource),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("artifact storage error: {0}")]
    Files(#[from] orderly_files::FilesError),
}

impl OrderError {
    /// Stable machine-readable code, used in batch breakdowns and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation_error",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::OrderNotEditable(_) => "order_not_editable",
            OrderError::NotAuthorizedSigner { .. } => "not_authorized_signer",
            OrderError::IncompleteOrder(_) => "incomplete_order",
            OrderError::AuthenticationFailed => "authentication_failed",
            OrderError::TooManyAttempts => "too_many_attempts",
            OrderError::InvalidSession => "invalid_session",
            OrderError::TooManyOrders { .. } => "too_many_orders",
            OrderError::NotFound(_) => "not_found",
            OrderError::Store(_) => "storage_error",
            OrderError::Files(_) => "artifact_storage_error",
        }
    }
}

fn join_missing(items: &[MissingItem]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type OrderResult<T> = std::result::Result<T, OrderError>;
