//! コンバータのハードウェア設定
//!
//! [`HardwareConfigBuilder`] がSPIN/TWISTの設定呼び出しを任意の順で集め、
//! [`HardwareConfigBuilder::build`] が検証して不変の [`HardwareConfig`] にします。
//! ハードウェアに適用すると [`ConfiguredHardware`] が得られ、
//! [`Scheduler`](crate::scheduler::Scheduler) はこれからしか構築できないため、
//! 設定完了前にタスクが起動することはありません。

use crate::config::params::converter::*;
use crate::error::ConfigError;
use crate::hardware::{
    BoardVersion, DeadTime, DutyCycle, Leg, PowerHardware, RegulationMode, ShieldVersion,
    Topology, LEG_COUNT,
};

/// 検証済みのレグ設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegSetup {
    pub topology: Topology,
    pub mode: RegulationMode,
    pub dead_time: DeadTime,
    /// 位相差 [度]、`None` はハードウェアのデフォルトのまま
    pub phase_shift_deg: Option<u16>,
    pub duty: DutyCycle,
}

/// 一度だけ書き込むコンバータ設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareConfig {
    board: BoardVersion,
    shield: ShieldVersion,
    legs: [Option<LegSetup>; LEG_COUNT],
    adc_decimation: u8,
    default_channels: bool,
}

impl HardwareConfig {
    pub fn builder() -> HardwareConfigBuilder {
        HardwareConfigBuilder::default()
    }

    /// 基準設定: SPIN v1.0、TWIST v1.3、両レグとも電圧モードのバック、
    /// 180度インターリーブ
    pub fn spin_twist_default() -> Result<Self, ConfigError> {
        Self::builder()
            .board(BoardVersion::Spin1_0)
            .shield(ShieldVersion::TwistV1_3)
            .all_buck(RegulationMode::Voltage)
            .adc_decimation(DEFAULT_ADC_DECIMATION)
            .all_dead_time(DEFAULT_DEAD_TIME_NS, DEFAULT_DEAD_TIME_NS)
            .leg_phase_shift(Leg::Leg2, DEFAULT_LEG2_PHASE_SHIFT_DEG)
            .default_channels()
            .all_duty_cycle(DEFAULT_DUTY_CYCLE)
            .build()
    }

    pub fn board(&self) -> BoardVersion {
        self.board
    }

    pub fn shield(&self) -> ShieldVersion {
        self.shield
    }

    pub fn adc_decimation(&self) -> u8 {
        self.adc_decimation
    }

    pub fn default_channels(&self) -> bool {
        self.default_channels
    }

    /// `leg` の設定、未使用なら `None`
    pub fn leg(&self, leg: Leg) -> Option<&LegSetup> {
        self.legs[leg.index()].as_ref()
    }

    /// 初期化済みレグとその設定
    pub fn legs(&self) -> impl Iterator<Item = (Leg, &LegSetup)> + '_ {
        Leg::ALL
            .iter()
            .filter_map(move |&leg| self.leg(leg).map(|setup| (leg, setup)))
    }

    /// 全ての設定呼び出しをハードウェアへ順に発行
    ///
    /// 順序: ボード、シールド、レグ初期化、ADCデシメーション、デッドタイム、
    /// 位相差、デフォルト計測チャンネル、デューティ比。最初に拒否された呼び出しで
    /// 中断し、ハードウェアは破棄される。
    pub fn apply<H: PowerHardware>(&self, mut hw: H) -> Result<ConfiguredHardware<H>, ConfigError> {
        hw.set_board_version(self.board)?;
        hw.set_shield_version(self.shield)?;
        info!("Board {} / shield {}", self.board, self.shield);

        for (leg, setup) in self.legs() {
            hw.init_leg(leg, setup.topology, setup.mode)?;
            info!("{}: {} in {} mode", leg, setup.topology, setup.mode);
        }

        hw.set_adc_decimation(self.adc_decimation)?;

        for (leg, setup) in self.legs() {
            hw.set_dead_time(leg, setup.dead_time)?;
        }

        for (leg, setup) in self.legs() {
            if let Some(degrees) = setup.phase_shift_deg {
                hw.set_phase_shift(leg, degrees)?;
                info!("{}: phase shift {} deg", leg, degrees);
            }
        }

        if self.default_channels {
            hw.enable_default_channels()?;
        }

        for (leg, setup) in self.legs() {
            hw.set_duty_cycle(leg, setup.duty)?;
        }

        info!("Hardware configuration applied");
        Ok(ConfiguredHardware {
            hw,
            config: *self,
        })
    }
}

/// [`HardwareConfig::apply`] を通過したハードウェア
pub struct ConfiguredHardware<H> {
    hw: H,
    config: HardwareConfig,
}

impl<H> ConfiguredHardware<H> {
    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub(crate) fn into_inner(self) -> H {
        self.hw
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingLeg {
    init: Option<(Topology, RegulationMode)>,
    dead_time: Option<DeadTime>,
    phase_shift_deg: Option<u16>,
    duty: Option<f32>,
}

impl PendingLeg {
    fn has_settings(&self) -> bool {
        self.dead_time.is_some() || self.phase_shift_deg.is_some() || self.duty.is_some()
    }
}

/// 設定呼び出しを集める。`all_*` は初期化済みの全レグに適用され、
/// `leg_*` で上書きされる
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareConfigBuilder {
    board: Option<BoardVersion>,
    shield: Option<ShieldVersion>,
    legs: [PendingLeg; LEG_COUNT],
    adc_decimation: Option<u8>,
    all_dead_time: Option<DeadTime>,
    all_phase_shift_deg: Option<u16>,
    all_duty: Option<f32>,
    default_channels: bool,
}

impl HardwareConfigBuilder {
    pub fn board(mut self, board: BoardVersion) -> Self {
        self.board = Some(board);
        self
    }

    pub fn shield(mut self, shield: ShieldVersion) -> Self {
        self.shield = Some(shield);
        self
    }

    /// 全レグをバックコンバータとして初期化
    pub fn all_buck(mut self, mode: RegulationMode) -> Self {
        for leg in Leg::ALL {
            self = self.leg_buck(leg, mode);
        }
        self
    }

    /// 全レグをブーストコンバータ（電圧モード）として初期化
    pub fn all_boost(mut self) -> Self {
        for leg in Leg::ALL {
            self = self.leg_boost(leg);
        }
        self
    }

    pub fn leg_buck(mut self, leg: Leg, mode: RegulationMode) -> Self {
        self.legs[leg.index()].init = Some((Topology::Buck, mode));
        self
    }

    pub fn leg_boost(mut self, leg: Leg) -> Self {
        self.legs[leg.index()].init = Some((Topology::Boost, RegulationMode::Voltage));
        self
    }

    pub fn adc_decimation(mut self, decimation: u8) -> Self {
        self.adc_decimation = Some(decimation);
        self
    }

    pub fn all_dead_time(mut self, rising_ns: u16, falling_ns: u16) -> Self {
        self.all_dead_time = Some(DeadTime::new(rising_ns, falling_ns));
        self
    }

    pub fn leg_dead_time(mut self, leg: Leg, rising_ns: u16, falling_ns: u16) -> Self {
        self.legs[leg.index()].dead_time = Some(DeadTime::new(rising_ns, falling_ns));
        self
    }

    /// 全レグに同じ位相差
    pub fn all_phase_shift(mut self, degrees: u16) -> Self {
        self.all_phase_shift_deg = Some(degrees);
        self
    }

    pub fn leg_phase_shift(mut self, leg: Leg, degrees: u16) -> Self {
        self.legs[leg.index()].phase_shift_deg = Some(degrees);
        self
    }

    /// シールドのデフォルト計測チャンネルを有効化
    pub fn default_channels(mut self) -> Self {
        self.default_channels = true;
        self
    }

    pub fn all_duty_cycle(mut self, duty: f32) -> Self {
        self.all_duty = Some(duty);
        self
    }

    pub fn leg_duty_cycle(mut self, leg: Leg, duty: f32) -> Self {
        self.legs[leg.index()].duty = Some(duty);
        self
    }

    /// 集めた設定を検証
    pub fn build(self) -> Result<HardwareConfig, ConfigError> {
        let board = self.board.ok_or(ConfigError::MissingBoardVersion)?;
        let shield = self.shield.ok_or(ConfigError::MissingShieldVersion)?;

        if self.legs.iter().all(|leg| leg.init.is_none()) {
            return Err(ConfigError::NoLegInitialized);
        }

        let adc_decimation = self.adc_decimation.ok_or(ConfigError::MissingAdcDecimation)?;
        if !(1..=MAX_ADC_DECIMATION).contains(&adc_decimation) {
            return Err(ConfigError::InvalidDecimation(adc_decimation));
        }

        let mut legs = [None; LEG_COUNT];
        for leg in Leg::ALL {
            let pending = &self.legs[leg.index()];
            let Some((topology, mode)) = pending.init else {
                if pending.has_settings() {
                    return Err(ConfigError::LegNotInitialized(leg));
                }
                continue;
            };

            let dead_time = pending
                .dead_time
                .or(self.all_dead_time)
                .ok_or(ConfigError::MissingDeadTime(leg))?;
            validate_dead_time(dead_time)?;

            let phase_shift_deg = pending.phase_shift_deg.or(self.all_phase_shift_deg);
            if let Some(degrees) = phase_shift_deg {
                if degrees >= 360 {
                    return Err(ConfigError::InvalidPhaseShift(degrees));
                }
            }

            let duty = pending
                .duty
                .or(self.all_duty)
                .ok_or(ConfigError::MissingDutyCycle(leg))?;
            let duty = DutyCycle::new(duty)?;

            legs[leg.index()] = Some(LegSetup {
                topology,
                mode,
                dead_time,
                phase_shift_deg,
                duty,
            });
        }

        Ok(HardwareConfig {
            board,
            shield,
            legs,
            adc_decimation,
            default_channels: self.default_channels,
        })
    }
}

fn validate_dead_time(dead_time: DeadTime) -> Result<(), ConfigError> {
    let valid = |ns: u16| (1..=MAX_DEAD_TIME_NS).contains(&ns);
    if valid(dead_time.rising_ns) && valid(dead_time.falling_ns) {
        Ok(())
    } else {
        Err(ConfigError::InvalidDeadTime {
            rising_ns: dead_time.rising_ns,
            falling_ns: dead_time.falling_ns,
        })
    }
}
