pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod escalation;
pub mod ledger;
pub mod policy;
pub mod pricing;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use chain::{AuditChain, ChainEntry, ChainVerification, ChainedAuditSink};
pub use config::{ConfigError, ConfigOverrides, EngineConfig, LoadOptions, LogFormat};
pub use domain::actor::{Actor, EmployeeId, Role};
pub use domain::budget::{BudgetEntry, PeriodId, Reservation, ReservationId, ReservationState};
pub use domain::decision::{DecisionId, DecisionRecord, DiscountRequest, EscalationReason};
pub use domain::escalation::{CaseAction, CaseId, CaseResolution, CaseState, EscalationCase};
pub use domain::product::{ProductEconomics, ProductId};
pub use engine::{
    DiscountEngine, EmployeeStore, EngineError, InMemoryEmployeeStore, InMemoryProductStore,
    ProductStore, StoreError,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use escalation::{
    CaseStore, CaseStoreError, CompletionOutcome, EscalationError, EscalationService,
    InMemoryCaseStore,
};
pub use ledger::{BudgetLedger, InMemoryBudgetLedger, LedgerError};
pub use policy::{MarginClass, TierCeiling, TierPolicy, TierRule};
pub use pricing::{PricingBreakdown, RoundingMode};
