//! Audit logging: append-only JSONL record of confirmations and cycle outcomes.

pub mod jsonl;
