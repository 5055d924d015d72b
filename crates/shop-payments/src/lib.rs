//! shop-payments
//!
//! Provider abstraction and the payment gateway.
//!
//! This crate owns the [`provider::PaymentProvider`] contract, the HTTP
//! client implementation for real processors, and the
//! [`gateway::PaymentGateway`] choke-point every charge must flow through.
//! Concrete offline providers (the sandbox) live in their own crate.

pub mod gateway;
pub mod provider;

pub use gateway::{AmountGate, ChargeGate, ChargeOutcome, CurrencyGate, GateRefusal, PaymentGateway};
pub use provider::{HttpPaymentProvider, PaymentProvider, ProviderError};
