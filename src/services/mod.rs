/*
 * Responsibility
 * - service 層の公開インターフェース (re-export)
 */
pub mod cache;
pub mod discovery;
pub mod exchange;
pub mod scopes;
