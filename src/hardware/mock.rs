//! SPIN/TWIST ハードウェアのモック
//!
//! 全ての呼び出しを順に記録し、テストから失敗を注入できます。ユニットテストと
//! ホストのシミュレーションで使用します。

use crate::error::{ConfigError, PowerStageError};
use crate::hardware::{
    BoardVersion, DeadTime, DutyCycle, Leg, PowerHardware, RegulationMode, ShieldVersion,
    StatusLed, Topology,
};

/// ログに保持する呼び出し数
pub const MAX_RECORDED_CALLS: usize = 32;

/// 記録されたハードウェア呼び出し
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    BoardVersion(BoardVersion),
    ShieldVersion(ShieldVersion),
    InitLeg(Leg, Topology, RegulationMode),
    AdcDecimation(u8),
    DeadTime(Leg, DeadTime),
    PhaseShift(Leg, u16),
    DefaultChannels,
    DutyCycle(Leg, DutyCycle),
    StartAll,
    StopAll,
}

impl Call {
    fn is_setup(&self) -> bool {
        !matches!(self, Call::StartAll | Call::StopAll)
    }
}

/// TWISTシールドのモック
#[derive(Debug)]
pub struct MockTwist {
    calls: [Option<Call>; MAX_RECORDED_CALLS],
    total_calls: usize,
    setup_calls: usize,
    reject_setup_call: Option<usize>,
    start_error: Option<PowerStageError>,
    start_count: u32,
    stop_count: u32,
    switching: bool,
}

impl MockTwist {
    pub const fn new() -> Self {
        Self {
            calls: [None; MAX_RECORDED_CALLS],
            total_calls: 0,
            setup_calls: 0,
            reject_setup_call: None,
            start_error: None,
            start_count: 0,
            stop_count: 0,
            switching: false,
        }
    }

    /// n番目（0始まり）の設定呼び出しを [`ConfigError::Rejected`] で拒否
    pub fn reject_setup_call(mut self, index: usize) -> Self {
        self.reject_setup_call = Some(index);
        self
    }

    /// 全ての `start_all` を `err` で失敗させる
    pub fn fail_start(mut self, err: PowerStageError) -> Self {
        self.start_error = Some(err);
        self
    }

    /// 記録された呼び出し（古い順）
    pub fn calls(&self) -> impl Iterator<Item = Call> + '_ {
        self.calls.iter().flatten().copied()
    }

    /// ログ容量を超えた分も含む呼び出し総数
    pub fn total_calls(&self) -> usize {
        self.total_calls
    }

    /// 受信した `start_all` 指令の数
    pub fn start_count(&self) -> u32 {
        self.start_count
    }

    /// 受信した `stop_all` 指令の数
    pub fn stop_count(&self) -> u32 {
        self.stop_count
    }

    /// レグがスイッチング中かどうか
    pub fn is_switching(&self) -> bool {
        self.switching
    }

    fn record(&mut self, call: Call) {
        if let Some(slot) = self.calls.get_mut(self.total_calls) {
            *slot = Some(call);
        }
        self.total_calls += 1;
    }

    fn setup(&mut self, call: Call) -> Result<(), ConfigError> {
        debug_assert!(call.is_setup());
        let index = self.setup_calls;
        self.setup_calls += 1;
        self.record(call);
        if self.reject_setup_call == Some(index) {
            return Err(ConfigError::Rejected);
        }
        Ok(())
    }
}

impl Default for MockTwist {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerHardware for MockTwist {
    fn set_board_version(&mut self, board: BoardVersion) -> Result<(), ConfigError> {
        self.setup(Call::BoardVersion(board))
    }

    fn set_shield_version(&mut self, shield: ShieldVersion) -> Result<(), ConfigError> {
        self.setup(Call::ShieldVersion(shield))
    }

    fn init_leg(
        &mut self,
        leg: Leg,
        topology: Topology,
        mode: RegulationMode,
    ) -> Result<(), ConfigError> {
        self.setup(Call::InitLeg(leg, topology, mode))
    }

    fn set_adc_decimation(&mut self, decimation: u8) -> Result<(), ConfigError> {
        self.setup(Call::AdcDecimation(decimation))
    }

    fn set_dead_time(&mut self, leg: Leg, dead_time: DeadTime) -> Result<(), ConfigError> {
        self.setup(Call::DeadTime(leg, dead_time))
    }

    fn set_phase_shift(&mut self, leg: Leg, degrees: u16) -> Result<(), ConfigError> {
        self.setup(Call::PhaseShift(leg, degrees))
    }

    fn enable_default_channels(&mut self) -> Result<(), ConfigError> {
        self.setup(Call::DefaultChannels)
    }

    fn set_duty_cycle(&mut self, leg: Leg, duty: DutyCycle) -> Result<(), ConfigError> {
        self.setup(Call::DutyCycle(leg, duty))
    }

    fn start_all(&mut self) -> Result<(), PowerStageError> {
        self.record(Call::StartAll);
        self.start_count += 1;
        if let Some(err) = self.start_error {
            return Err(err);
        }
        self.switching = true;
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), PowerStageError> {
        self.record(Call::StopAll);
        self.stop_count += 1;
        self.switching = false;
        Ok(())
    }
}

/// ステータスLEDのモック
#[derive(Debug, Default)]
pub struct MockLed {
    on: bool,
    toggles: u32,
}

impl MockLed {
    pub const fn new() -> Self {
        Self {
            on: false,
            toggles: 0,
        }
    }

    pub fn toggles(&self) -> u32 {
        self.toggles
    }
}

impl StatusLed for MockLed {
    fn toggle(&mut self) {
        self.on = !self.on;
        self.toggles += 1;
    }

    fn is_on(&self) -> bool {
        self.on
    }
}
