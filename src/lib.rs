/*
 * Responsibility
 * - モジュールの公開 (bin と tests/ が同じ配線を使うため lib に集約)
 * - ロジックは置かない
 */
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod services;
pub mod state;
