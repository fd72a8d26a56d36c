//! スケジューラとコンバータのデフォルトパラメータ

/// クリティカルタスク周期 [μs]（2kHz制御ループ）
pub const CRITICAL_PERIOD_US: u32 = 500;

/// スケジューラが受け付ける最短クリティカル周期 [μs]
pub const MIN_CRITICAL_PERIOD_US: u32 = 50;

/// バックグラウンドタスクの実行間隔 [ms]
pub const BACKGROUND_PERIOD_MS: u32 = 1000;

/// フォールトラッチ後のバックグラウンドタスク実行間隔 [ms]
pub const FAULT_BLINK_MS: u32 = 100;

/// 定期デバッグログのtick間隔（2kHzで1秒）
pub const CRITICAL_LOG_INTERVAL: u32 = 2000;

/// コンバータ設定のデフォルト値
pub mod converter {
    /// ADCデシメーション係数
    pub const DEFAULT_ADC_DECIMATION: u8 = 1;

    /// ADCデシメーション係数の上限
    pub const MAX_ADC_DECIMATION: u8 = 32;

    /// デッドタイム（立ち上がり・立ち下がり共通）[ns]
    pub const DEFAULT_DEAD_TIME_NS: u16 = 200;

    /// 受け付けるデッドタイムの上限 [ns]
    pub const MAX_DEAD_TIME_NS: u16 = 1000;

    /// レグ1に対するレグ2の位相差 [度]（インターリーブ）
    pub const DEFAULT_LEG2_PHASE_SHIFT_DEG: u16 = 180;

    /// 初期デューティ比
    pub const DEFAULT_DUTY_CYCLE: f32 = 0.9;
}

/// PWMタイマ設定
pub mod pwm {
    /// TIM1カーネルクロック [Hz]（PLL 170MHz）
    pub const TIMER_CLOCK_HZ: u32 = 170_000_000;

    /// スイッチング周波数 [Hz]
    pub const SWITCHING_FREQUENCY_HZ: u32 = 200_000;
}
