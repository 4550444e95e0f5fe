/*
 * Responsibility
 * - middleware の公開インターフェース (re-export)
 * - 適用順は app.rs が決める (health が最外、次に http/cors、auth は router 直近)
 */
pub mod auth;
pub mod cors;
pub mod health;
pub mod http;
