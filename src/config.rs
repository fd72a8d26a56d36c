//! 設定モジュール
//!
//! コンパイル時のデフォルト値は [`params`] に、コンバータ設定は検証済みの
//! [`HardwareConfig`] にまとめ、スケジューリング開始前に一度だけ適用します。

pub mod converter;
pub mod params;

pub use params::*;

pub use converter::{ConfiguredHardware, HardwareConfig, HardwareConfigBuilder, LegSetup};
