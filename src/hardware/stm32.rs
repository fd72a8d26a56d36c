//! STM32G474 上の SPIN/TWIST バックエンド
//!
//! 両レグともTIM1のセンターアライン相補PWMで駆動します:
//! レグ1は CH1 (PA8) / CH1N (PA7)、レグ2は CH2 (PA9) / CH2N (PB0)。
//! 180度の位相差はそのレグをPWMモード2にしてコンペア値の補数をとることで作り、
//! デッドタイム挿入前のリファレンスをシフトします。出力極性は反転しません。

use embassy_stm32::gpio::Output;
use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals::Ocm;
use embassy_stm32::peripherals;
use embassy_stm32::timer::complementary_pwm::ComplementaryPwm;
use embassy_stm32::timer::Channel;
use embassy_stm32::Config;

use crate::config::pwm::TIMER_CLOCK_HZ;
use crate::error::{ConfigError, PowerStageError};
use crate::hardware::{
    channel_output, dead_time_ticks, BoardVersion, ChannelOutput, DeadTime, DutyCycle, Leg,
    LegPhase, OutputMode, Polarity, PowerHardware, RegulationMode, ShieldVersion, StatusLed,
    Topology, LEG_COUNT,
};

/// RCCクロック設定
///
/// HSI -> PLL (/4 x85 /2) = 170MHz（システム・TIM1クロック）
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

#[derive(Debug, Clone, Copy)]
struct LegState {
    topology: Option<Topology>,
    phase: LegPhase,
    duty: DutyCycle,
    dead_time_ticks: u16,
}

impl LegState {
    const IDLE: LegState = LegState {
        topology: None,
        phase: LegPhase::InPhase,
        duty: DutyCycle::ZERO,
        dead_time_ticks: 0,
    };
}

/// TIM1で駆動するTWISTシールド
pub struct Stm32Twist {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    legs: [LegState; LEG_COUNT],
    adc_decimation: u8,
    default_channels: bool,
}

impl Stm32Twist {
    /// TIM1相補PWMを受け取る（全出力を無効化）
    pub fn new(mut pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        for leg in Leg::ALL {
            pwm.disable(channel(leg));
        }
        let max_duty = u16::try_from(pwm.get_max_duty()).unwrap_or(u16::MAX);
        Self {
            pwm,
            max_duty,
            legs: [LegState::IDLE; LEG_COUNT],
            adc_decimation: 1,
            default_channels: false,
        }
    }

    pub fn adc_decimation(&self) -> u8 {
        self.adc_decimation
    }

    pub fn default_channels(&self) -> bool {
        self.default_channels
    }

    fn topology(&self, leg: Leg) -> Result<Topology, ConfigError> {
        self.legs[leg.index()]
            .topology
            .ok_or(ConfigError::LegNotInitialized(leg))
    }

    /// レグのチャンネルにモード・極性・コンペア値を書き込む
    fn program(&mut self, leg: Leg) -> Result<(), ConfigError> {
        let topology = self.topology(leg)?;
        let state = self.legs[leg.index()];
        let output = channel_output(state.duty, self.max_duty, topology, state.phase);
        let index = leg.index();

        pac::TIM1
            .ccmr_output(index / 2)
            .modify(|w| w.set_ocm(index % 2, compare_mode(output)));
        let inverted = output.polarity == Polarity::ActiveLow;
        pac::TIM1.ccer().modify(|w| {
            w.set_ccp(index, inverted);
            w.set_ccnp(index, inverted);
        });
        self.pwm.set_duty(channel(leg), output.compare);
        Ok(())
    }
}

fn compare_mode(output: ChannelOutput) -> Ocm {
    match output.mode {
        OutputMode::PwmMode1 => Ocm::PWM_MODE1,
        OutputMode::PwmMode2 => Ocm::PWM_MODE2,
    }
}

fn channel(leg: Leg) -> Channel {
    match leg {
        Leg::Leg1 => Channel::Ch1,
        Leg::Leg2 => Channel::Ch2,
    }
}

impl PowerHardware for Stm32Twist {
    fn set_board_version(&mut self, board: BoardVersion) -> Result<(), ConfigError> {
        match board {
            BoardVersion::Spin0_9 => Err(ConfigError::UnsupportedBoard(board)),
            BoardVersion::Spin1_0 | BoardVersion::Spin1_1 => Ok(()),
        }
    }

    fn set_shield_version(&mut self, shield: ShieldVersion) -> Result<(), ConfigError> {
        match shield {
            ShieldVersion::TwistV1_2 => Err(ConfigError::UnsupportedShield(shield)),
            ShieldVersion::TwistV1_3 | ShieldVersion::TwistV1_4 => Ok(()),
        }
    }

    fn init_leg(
        &mut self,
        leg: Leg,
        topology: Topology,
        mode: RegulationMode,
    ) -> Result<(), ConfigError> {
        // 電流モードはコンパレータ・スロープ補償が必要
        if mode == RegulationMode::Current {
            return Err(ConfigError::UnsupportedRegulationMode(mode));
        }
        self.pwm.disable(channel(leg));
        self.legs[leg.index()].topology = Some(topology);
        Ok(())
    }

    fn set_adc_decimation(&mut self, decimation: u8) -> Result<(), ConfigError> {
        if decimation == 0 {
            return Err(ConfigError::InvalidDecimation(decimation));
        }
        self.adc_decimation = decimation;
        debug!("ADC decimation {}", decimation);
        Ok(())
    }

    fn set_dead_time(&mut self, leg: Leg, dead_time: DeadTime) -> Result<(), ConfigError> {
        self.topology(leg)?;
        self.legs[leg.index()].dead_time_ticks =
            dead_time_ticks(dead_time.max_ns(), TIMER_CLOCK_HZ);

        // TIM1のデッドタイム生成器は全チャンネル共通
        let ticks = self
            .legs
            .iter()
            .map(|state| state.dead_time_ticks)
            .max()
            .unwrap_or(0);
        self.pwm.set_dead_time(ticks);
        debug!("{}: dead-time {} ticks", leg, ticks);
        Ok(())
    }

    fn set_phase_shift(&mut self, leg: Leg, degrees: u16) -> Result<(), ConfigError> {
        self.topology(leg)?;
        self.legs[leg.index()].phase = LegPhase::from_degrees(degrees)?;
        self.program(leg)
    }

    fn enable_default_channels(&mut self) -> Result<(), ConfigError> {
        self.default_channels = true;
        Ok(())
    }

    fn set_duty_cycle(&mut self, leg: Leg, duty: DutyCycle) -> Result<(), ConfigError> {
        self.topology(leg)?;
        self.legs[leg.index()].duty = duty;
        self.program(leg)
    }

    fn start_all(&mut self) -> Result<(), PowerStageError> {
        let mut started = false;
        for leg in Leg::ALL {
            if self.legs[leg.index()].topology.is_some() {
                self.pwm.enable(channel(leg));
                started = true;
            }
        }
        if started {
            Ok(())
        } else {
            Err(PowerStageError::CommandRejected)
        }
    }

    fn stop_all(&mut self) -> Result<(), PowerStageError> {
        for leg in Leg::ALL {
            self.pwm.disable(channel(leg));
        }
        Ok(())
    }
}

/// プッシュプル出力のステータスLED
pub struct Led(Output<'static>);

impl Led {
    pub fn new(output: Output<'static>) -> Self {
        Self(output)
    }
}

impl StatusLed for Led {
    fn toggle(&mut self) {
        self.0.toggle();
    }

    fn is_on(&self) -> bool {
        self.0.is_set_high()
    }
}
