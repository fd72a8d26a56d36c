//! エラー型
//!
//! 設定フェーズのエラー（[`ConfigError`]、[`SchedulerError`]）は致命的で、
//! 起動処理まで伝播します。tick毎のエラー（[`PowerStageError`]、[`TickError`]）は
//! クリティカルランナーが捕捉して [`Fault`] として通知し、クリティカルタイマは
//! 止めません。

use core::fmt;

use crate::hardware::{BoardVersion, Leg, RegulationMode, ShieldVersion};
use crate::scheduler::TaskKind;

/// 受け付けられないハードウェア設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum ConfigError {
    /// ビルダーで `board()` が呼ばれていない
    MissingBoardVersion,
    /// ビルダーで `shield()` が呼ばれていない
    MissingShieldVersion,
    /// 初期化されたレグがない
    NoLegInitialized,
    /// 初期化されていないレグへの設定
    LegNotInitialized(Leg),
    /// 初期化済みレグにデッドタイムがない
    MissingDeadTime(Leg),
    /// 初期化済みレグにデューティ比がない
    MissingDutyCycle(Leg),
    /// ビルダーで `adc_decimation()` が呼ばれていない
    MissingAdcDecimation,
    /// ADCデシメーション係数が範囲外
    InvalidDecimation(u8),
    /// デッドタイムが0または長すぎる
    InvalidDeadTime { rising_ns: u16, falling_ns: u16 },
    /// 位相差が360度以上
    InvalidPhaseShift(u16),
    /// デューティ比が有限でない、または `[0, 1]` の範囲外
    InvalidDutyCycle,
    /// このバックエンドが対応していないボードリビジョン
    UnsupportedBoard(BoardVersion),
    /// このバックエンドが対応していないシールドリビジョン
    UnsupportedShield(ShieldVersion),
    /// このバックエンドが対応していない制御モード
    UnsupportedRegulationMode(RegulationMode),
    /// このバックエンドで生成できない位相差
    UnsupportedPhaseShift(u16),
    /// ハードウェアが呼び出しを拒否した
    Rejected,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBoardVersion => write!(f, "board version not set"),
            Self::MissingShieldVersion => write!(f, "shield version not set"),
            Self::NoLegInitialized => write!(f, "no converter leg initialized"),
            Self::LegNotInitialized(leg) => write!(f, "{leg:?} is not initialized"),
            Self::MissingDeadTime(leg) => write!(f, "{leg:?} has no dead-time"),
            Self::MissingDutyCycle(leg) => write!(f, "{leg:?} has no duty cycle"),
            Self::MissingAdcDecimation => write!(f, "ADC decimation not set"),
            Self::InvalidDecimation(n) => write!(f, "invalid ADC decimation {n}"),
            Self::InvalidDeadTime {
                rising_ns,
                falling_ns,
            } => write!(f, "invalid dead-time {rising_ns}/{falling_ns} ns"),
            Self::InvalidPhaseShift(deg) => write!(f, "invalid phase shift {deg} deg"),
            Self::InvalidDutyCycle => write!(f, "duty cycle outside [0, 1]"),
            Self::UnsupportedBoard(board) => write!(f, "unsupported board {board:?}"),
            Self::UnsupportedShield(shield) => write!(f, "unsupported shield {shield:?}"),
            Self::UnsupportedRegulationMode(mode) => {
                write!(f, "unsupported regulation mode {mode:?}")
            }
            Self::UnsupportedPhaseShift(deg) => write!(f, "unsupported phase shift {deg} deg"),
            Self::Rejected => write!(f, "hardware rejected the configuration call"),
        }
    }
}

/// タスク登録・ライフサイクルのエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum SchedulerError {
    /// この種類の実行コンテキストが残っていない
    ContextUnavailable(TaskKind),
    /// クリティカル周期が下限未満 [μs]
    InvalidPeriod(u32),
    /// ハンドルが期待する種類のタスクを指していない
    UnknownHandle,
    /// タスクは起動済み
    AlreadyStarted(TaskKind),
    /// この種類のタスクが登録されていない
    NotRegistered(TaskKind),
    /// タスクは登録済みだが未起動
    NotStarted(TaskKind),
    /// バックグラウンドタスクより先にクリティカルタスクを起動した
    OrderViolation,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextUnavailable(kind) => write!(f, "no {kind:?} context available"),
            Self::InvalidPeriod(us) => write!(f, "invalid critical period {us} us"),
            Self::UnknownHandle => write!(f, "unknown task handle"),
            Self::AlreadyStarted(kind) => write!(f, "{kind:?} task already started"),
            Self::NotRegistered(kind) => write!(f, "{kind:?} task not registered"),
            Self::NotStarted(kind) => write!(f, "{kind:?} task not started"),
            Self::OrderViolation => write!(f, "critical task started before background task"),
        }
    }
}

/// パワーステージ指令の失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum PowerStageError {
    /// ドライバが指令を拒否した
    CommandRejected,
    /// ドライバがハードウェアフォールトを通知した
    DriverFault,
}

impl fmt::Display for PowerStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandRejected => write!(f, "power-stage command rejected"),
            Self::DriverFault => write!(f, "power-stage driver fault"),
        }
    }
}

/// クリティカルtick内で制御則が返すエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum TickError {
    /// 計測値が取得できない、または範囲外
    Measurement,
    /// アクチュエータ更新の失敗
    Actuation,
    /// パワーステージ指令の失敗
    PowerStage(PowerStageError),
}

impl From<PowerStageError> for TickError {
    fn from(err: PowerStageError) -> Self {
        Self::PowerStage(err)
    }
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement => write!(f, "measurement failed"),
            Self::Actuation => write!(f, "actuation failed"),
            Self::PowerStage(err) => write!(f, "{err}"),
        }
    }
}

/// クリティカル側が発生させ、バックグラウンド側が通知するフォールト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum Fault {
    /// クリティカル実行が周期内に完了しなかった
    Overrun { elapsed_us: u32, period_us: u32 },
    /// パワーステージ起動指令の失敗
    PowerStage(PowerStageError),
    /// 制御則がエラーを返した
    Tick(TickError),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overrun {
                elapsed_us,
                period_us,
            } => write!(f, "critical overrun: {elapsed_us} us > {period_us} us"),
            Self::PowerStage(err) => write!(f, "{err}"),
            Self::Tick(err) => write!(f, "{err}"),
        }
    }
}

/// 起動時の致命的エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum Error {
    Config(ConfigError),
    Scheduler(SchedulerError),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<SchedulerError> for Error {
    fn from(err: SchedulerError) -> Self {
        Self::Scheduler(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Scheduler(err) => write!(f, "scheduler error: {err}"),
        }
    }
}
