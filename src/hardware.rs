//! ハードウェア設定インターフェース
//!
//! SPINコントローラボードとTWISTコンバータシールドは [`PowerHardware`] 経由で
//! 駆動します。設定呼び出しは
//! [`HardwareConfig::apply`](crate::config::HardwareConfig::apply) が一度だけ順に
//! 発行し、以降パワーステージに指令するのはクリティカルタスクのみです。

pub mod mock;
#[cfg(target_os = "none")]
pub mod stm32;

use crate::error::{ConfigError, PowerStageError};

/// SPINコントローラボードのリビジョン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum BoardVersion {
    Spin0_9,
    Spin1_0,
    Spin1_1,
}

/// TWISTパワーシールドのリビジョン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum ShieldVersion {
    TwistV1_2,
    TwistV1_3,
    TwistV1_4,
}

/// TWISTシールドのレグ数
pub const LEG_COUNT: usize = 2;

/// TWISTシールドのコンバータレグ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum Leg {
    Leg1,
    Leg2,
}

impl Leg {
    /// 全レグ（位相差の順）
    pub const ALL: [Leg; LEG_COUNT] = [Leg::Leg1, Leg::Leg2];

    /// [`Leg::ALL`] 内の位置
    pub const fn index(self) -> usize {
        match self {
            Leg::Leg1 => 0,
            Leg::Leg2 => 1,
        }
    }
}

/// レグのコンバータトポロジ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum Topology {
    Buck,
    Boost,
}

/// レグの制御モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum RegulationMode {
    Voltage,
    Current,
}

/// 相補スイッチ遷移間のデッドタイム [ns]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct DeadTime {
    pub rising_ns: u16,
    pub falling_ns: u16,
}

impl DeadTime {
    pub const fn new(rising_ns: u16, falling_ns: u16) -> Self {
        Self {
            rising_ns,
            falling_ns,
        }
    }

    /// 両エッジのうち長い方
    pub fn max_ns(&self) -> u16 {
        self.rising_ns.max(self.falling_ns)
    }
}

/// PWMデューティ比（有限かつ `[0, 1]` 内を保証）
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct DutyCycle(f32);

impl DutyCycle {
    pub const ZERO: DutyCycle = DutyCycle(0.0);

    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidDutyCycle)
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// パワーハードウェアの設定・指令インターフェース
///
/// 設定呼び出しは冪等であること。タスク起動前に一度だけ発行される。
/// `start_all`/`stop_all` はクリティカルタスクから発行される。
pub trait PowerHardware {
    fn set_board_version(&mut self, board: BoardVersion) -> Result<(), ConfigError>;

    fn set_shield_version(&mut self, shield: ShieldVersion) -> Result<(), ConfigError>;

    /// 指定トポロジ・モードでレグを初期化
    fn init_leg(
        &mut self,
        leg: Leg,
        topology: Topology,
        mode: RegulationMode,
    ) -> Result<(), ConfigError>;

    /// ADCサンプルの間引き係数
    fn set_adc_decimation(&mut self, decimation: u8) -> Result<(), ConfigError>;

    fn set_dead_time(&mut self, leg: Leg, dead_time: DeadTime) -> Result<(), ConfigError>;

    /// レグのスイッチングパターンの位相差 [度]
    fn set_phase_shift(&mut self, leg: Leg, degrees: u16) -> Result<(), ConfigError>;

    /// シールドのデフォルト計測チャンネルを有効化
    fn enable_default_channels(&mut self) -> Result<(), ConfigError>;

    fn set_duty_cycle(&mut self, leg: Leg, duty: DutyCycle) -> Result<(), ConfigError>;

    /// 初期化済みの全レグでスイッチング開始
    fn start_all(&mut self) -> Result<(), PowerStageError>;

    /// 全レグのスイッチング停止
    fn stop_all(&mut self) -> Result<(), PowerStageError>;
}

/// バックグラウンドタスクが駆動するステータス表示
pub trait StatusLed {
    fn toggle(&mut self);

    fn is_on(&self) -> bool;
}

/// デッドタイム [ns] をタイマtick数に変換（切り上げ）
///
/// # 引数
/// * `ns` - デッドタイム [ns]
/// * `timer_clock_hz` - タイマカーネルクロック [Hz]
///
/// # 戻り値
/// tick数（`u16::MAX` で飽和）
pub fn dead_time_ticks(ns: u16, timer_clock_hz: u32) -> u16 {
    let ticks = (ns as u64 * timer_clock_hz as u64).div_ceil(1_000_000_000);
    ticks.min(u16::MAX as u64) as u16
}

/// デューティ比をセンターアラインタイマのコンペア値に変換
///
/// ブーストレグはローサイドを駆動するため、ハイサイドのコンペア値は補数になる。
/// 逆相レグはPWMモード2（コンペア値以上でリファレンス有効）で動作するため、
/// さらに補数をとる。
///
/// # 引数
/// * `duty` - ハイサイド（バック）またはローサイド（ブースト）のデューティ
/// * `max` - タイマのオートリロード値
/// * `topology` - レグのトポロジ
/// * `opposed` - 180度シフトしたレグ
pub fn duty_to_compare(duty: DutyCycle, max: u16, topology: Topology, opposed: bool) -> u16 {
    let on = libm::roundf(duty.get() * max as f32) as u16;
    let on = on.min(max);
    let complemented = matches!(topology, Topology::Boost) ^ opposed;
    if complemented {
        max - on
    } else {
        on
    }
}

/// タイマカウンタに対するレグの位相
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum LegPhase {
    /// カウンタの谷を中心とするパルス
    InPhase,
    /// カウンタの山を中心とするパルス（180度）
    Opposed,
}

impl LegPhase {
    /// センターアラインタイマで実現できる位相
    pub fn from_degrees(degrees: u16) -> Result<Self, ConfigError> {
        match degrees {
            0 => Ok(LegPhase::InPhase),
            180 => Ok(LegPhase::Opposed),
            _ => Err(ConfigError::UnsupportedPhaseShift(degrees)),
        }
    }
}

/// チャンネルのアウトプットコンペアモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum OutputMode {
    /// counter < compare でリファレンス有効
    PwmMode1,
    /// counter >= compare でリファレンス有効
    PwmMode2,
}

impl OutputMode {
    /// カウンタ値に対するリファレンスのレベル
    pub fn reference_active(self, compare: u16, counter: u16) -> bool {
        match self {
            OutputMode::PwmMode1 => counter < compare,
            OutputMode::PwmMode2 => counter >= compare,
        }
    }
}

/// 出力極性（デッドタイム生成の後段で適用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

/// 相補タイマチャンネル1本分の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct ChannelOutput {
    pub mode: OutputMode,
    pub compare: u16,
    /// 主出力・相補出力の極性
    pub polarity: Polarity,
}

/// レグのチャンネル設定
///
/// 位相はデッドタイム挿入前のリファレンスで作る。極性は両出力ともアクティブHighの
/// まま（反転するとデッドタイム中に両出力が有効になる）。
pub fn channel_output(
    duty: DutyCycle,
    max: u16,
    topology: Topology,
    phase: LegPhase,
) -> ChannelOutput {
    let opposed = phase == LegPhase::Opposed;
    ChannelOutput {
        mode: if opposed {
            OutputMode::PwmMode2
        } else {
            OutputMode::PwmMode1
        },
        compare: duty_to_compare(duty, max, topology, opposed),
        polarity: Polarity::ActiveHigh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_cycle_range() {
        assert!(DutyCycle::new(0.0).is_ok());
        assert!(DutyCycle::new(0.9).is_ok());
        assert!(DutyCycle::new(1.0).is_ok());
        assert_eq!(DutyCycle::new(1.01), Err(ConfigError::InvalidDutyCycle));
        assert_eq!(DutyCycle::new(-0.1), Err(ConfigError::InvalidDutyCycle));
        assert_eq!(DutyCycle::new(f32::NAN), Err(ConfigError::InvalidDutyCycle));
    }

    #[test]
    fn test_dead_time_ticks() {
        // 170MHz: 1tick = 5.88ns、200ns -> 34tick
        assert_eq!(dead_time_ticks(200, 170_000_000), 34);
        // 切り上げ: 設定値より短くならない
        assert_eq!(dead_time_ticks(1, 170_000_000), 1);
        assert_eq!(dead_time_ticks(0, 170_000_000), 0);
        assert_eq!(dead_time_ticks(u16::MAX, 4_000_000_000), u16::MAX);
    }

    #[test]
    fn test_duty_to_compare() {
        let duty = DutyCycle::new(0.25).unwrap();
        assert_eq!(duty_to_compare(duty, 400, Topology::Buck, false), 100);
        assert_eq!(duty_to_compare(duty, 400, Topology::Buck, true), 300);
        assert_eq!(duty_to_compare(duty, 400, Topology::Boost, false), 300);
        // 逆相のブーストレグは2回補数をとる
        assert_eq!(duty_to_compare(duty, 400, Topology::Boost, true), 100);

        let full = DutyCycle::new(1.0).unwrap();
        assert_eq!(duty_to_compare(full, 400, Topology::Buck, false), 400);
    }

    #[test]
    fn test_leg_phase_from_degrees() {
        assert_eq!(LegPhase::from_degrees(0), Ok(LegPhase::InPhase));
        assert_eq!(LegPhase::from_degrees(180), Ok(LegPhase::Opposed));
        assert_eq!(
            LegPhase::from_degrees(90),
            Err(ConfigError::UnsupportedPhaseShift(90))
        );
    }

    #[test]
    fn test_channel_output_never_inverts_polarity() {
        let duty = DutyCycle::new(0.9).unwrap();
        for topology in [Topology::Buck, Topology::Boost] {
            for phase in [LegPhase::InPhase, LegPhase::Opposed] {
                let output = channel_output(duty, 400, topology, phase);
                assert_eq!(output.polarity, Polarity::ActiveHigh);
            }
        }
    }

    #[test]
    fn test_opposed_leg_uses_pwm_mode_2() {
        let duty = DutyCycle::new(0.25).unwrap();
        assert_eq!(
            channel_output(duty, 400, Topology::Buck, LegPhase::InPhase),
            ChannelOutput {
                mode: OutputMode::PwmMode1,
                compare: 100,
                polarity: Polarity::ActiveHigh,
            }
        );
        assert_eq!(
            channel_output(duty, 400, Topology::Buck, LegPhase::Opposed),
            ChannelOutput {
                mode: OutputMode::PwmMode2,
                compare: 300,
                polarity: Polarity::ActiveHigh,
            }
        );
    }

    /// センターアライン1周期分の主出力・相補出力
    /// （リファレンスにデッドタイムを挿入し、その後で極性を適用）
    fn switch_pattern(output: ChannelOutput, max: u16, dead_ticks: u16) -> Vec<(bool, bool)> {
        let counter = (0..max).chain((1..=max).rev());
        let reference: Vec<bool> = counter
            .map(|count| output.mode.reference_active(output.compare, count))
            .collect();
        let invert = output.polarity == Polarity::ActiveLow;
        (0..reference.len())
            .map(|i| {
                let held = |level: bool| {
                    (0..=dead_ticks as usize)
                        .all(|back| i >= back && reference[i - back] == level)
                };
                (held(true) ^ invert, held(false) ^ invert)
            })
            .collect()
    }

    #[test]
    fn test_opposed_leg_centered_on_peak_without_overlap() {
        let duty = DutyCycle::new(0.25).unwrap();
        let in_phase = channel_output(duty, 400, Topology::Buck, LegPhase::InPhase);
        let opposed = channel_output(duty, 400, Topology::Buck, LegPhase::Opposed);

        let high_ticks = |output: ChannelOutput| {
            (0..400)
                .chain((1..=400).rev())
                .filter(|&count| output.mode.reference_active(output.compare, count))
                .count()
        };
        // パルス幅は同じ（離散カウンタの山の1tick分の差を除く）
        assert!(high_ticks(in_phase).abs_diff(high_ticks(opposed)) <= 2);
        // 同相レグは谷、逆相レグは山が中心
        assert!(in_phase.mode.reference_active(in_phase.compare, 0));
        assert!(!in_phase.mode.reference_active(in_phase.compare, 400));
        assert!(opposed.mode.reference_active(opposed.compare, 400));
        assert!(!opposed.mode.reference_active(opposed.compare, 0));

        for output in [in_phase, opposed] {
            let pattern = switch_pattern(output, 400, 34);
            assert!(pattern.iter().all(|&(high, low)| !(high && low)));
        }
    }

    #[test]
    fn test_dead_time_max_edge() {
        assert_eq!(DeadTime::new(150, 200).max_ns(), 200);
        assert_eq!(DeadTime::new(300, 200).max_ns(), 300);
    }
}
