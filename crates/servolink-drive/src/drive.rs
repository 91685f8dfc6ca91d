//! A drive reached through a [`Transport`].
//!
//! [`Drive`] subscribes to the node's statusword and emergency pushes on
//! creation. The statusword lands in a [`StatuswordCache`] that every state
//! machine operation waits on; emergencies land in a bounded queue.
//!
//! A transport dispatches to one subscriber per node, so only one `Drive`
//! can be attached to a node at a time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servolink_errors::{ErrorKind, Result, ServoError};
use servolink_transport::{
    EmergencyCallback, RegisterDescriptor, SlotToken, StatuswordCallback, Transport,
    TransportExt, Value,
};
use tracing::{debug, info, warn};

use crate::config::DriveConfig;
use crate::deadline::Deadline;
use crate::emcy::EmergencyQueue;
use crate::pds::{DriveFlags, DriveState, HomingStatus, OperationMode, PdsCommand, cw, sw};
use crate::statusword::StatuswordCache;
use crate::units::{NativeUnits, ScaleFactor};

/// Called with the new state and flags whenever the decoded state changes.
pub type StateCallback = Arc<dyn Fn(DriveState, DriveFlags) + Send + Sync>;

/// Handle returned by [`Drive::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateToken(usize);

struct Shared {
    node: u8,
    statusword: StatuswordCache,
    emergencies: EmergencyQueue,
    observers: Mutex<Vec<Option<StateCallback>>>,
}

impl Shared {
    fn on_statusword(&self, value: u16) {
        let Some(previous) = self.statusword.update(value) else {
            return;
        };
        let before = DriveState::decode(previous);
        let after = DriveState::decode(value);
        if before == after {
            return;
        }
        debug!(node = self.node, from = %before, to = %after, statusword = value, "PDS transition");

        let callbacks: Vec<StateCallback> =
            self.observers.lock().iter().flatten().cloned().collect();
        let flags = DriveFlags::from_statusword(value);
        for callback in callbacks {
            callback(after, flags);
        }
    }
}

pub struct Drive<T: Transport + ?Sized> {
    transport: Arc<T>,
    node: u8,
    config: DriveConfig,
    shared: Arc<Shared>,
    mode: Mutex<OperationMode>,
    scale: Arc<dyn ScaleFactor>,
    statusword_token: SlotToken,
    emergency_token: SlotToken,
}

impl<T: Transport + ?Sized> std::fmt::Debug for Drive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("node", &self.node)
            .field("state", &self.state().0)
            .field("mode", &*self.mode.lock())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + ?Sized> Drive<T> {
    /// Attach to `node`, then read the current statusword once.
    ///
    /// A statusword pushed while the initial read is in flight wins over the
    /// read result.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an invalid configuration, `AlreadyInProgress`
    /// if another subscriber holds the node, and any transport error from the
    /// initial statusword read.
    pub fn new(transport: Arc<T>, node: u8, config: DriveConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            node,
            statusword: StatuswordCache::new(0),
            emergencies: EmergencyQueue::new(config.emergency_capacity),
            observers: Mutex::new(Vec::new()),
        });
        let seen = shared.statusword.snapshot().generation;

        let on_statusword: StatuswordCallback = {
            let shared = Arc::clone(&shared);
            Arc::new(move |_node: u8, value: u16| shared.on_statusword(value))
        };
        let statusword_token = transport.subscribe_statusword(node, on_statusword)?;

        let on_emergency: EmergencyCallback = {
            let shared = Arc::clone(&shared);
            Arc::new(move |_node: u8, code: u32| shared.emergencies.push(code))
        };
        let emergency_token = match transport.subscribe_emergency(node, on_emergency) {
            Ok(token) => token,
            Err(e) => {
                release(&*transport, node, statusword_token, None);
                return Err(e);
            }
        };

        match transport.read_u16(node, config.registers.statusword) {
            Ok(value) => {
                if !shared.statusword.seed(seen, value) {
                    debug!(node, "statusword pushed during attach, keeping it");
                }
            }
            Err(e) => {
                release(&*transport, node, statusword_token, Some(emergency_token));
                return Err(e);
            }
        }
        let initial = shared.statusword.get();

        info!(node, state = %DriveState::decode(initial), "drive attached");
        Ok(Self {
            transport,
            node,
            config,
            shared,
            mode: Mutex::new(OperationMode::default()),
            scale: Arc::new(NativeUnits),
            statusword_token,
            emergency_token,
        })
    }

    /// Replace the unit conversion used by the scaled accessors.
    #[must_use]
    pub fn with_scale(mut self, scale: Arc<dyn ScaleFactor>) -> Self {
        self.scale = scale;
        self
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Last statusword seen.
    pub fn statusword(&self) -> u16 {
        self.shared.statusword.get()
    }

    pub fn state(&self) -> (DriveState, DriveFlags) {
        let value = self.shared.statusword.get();
        (DriveState::decode(value), DriveFlags::from_statusword(value))
    }

    fn write_controlword(&self, value: u16) -> Result<()> {
        self.transport
            .write_u16(self.node, self.config.registers.controlword, value, true)
    }

    fn undecodable(&self, statusword: u16) -> ServoError {
        ServoError::invalid_state(format!(
            "node {} reports statusword {statusword:#06x}, which is no PDS state",
            self.node
        ))
    }

    fn command(&self, command: PdsCommand) -> Result<()> {
        debug!(node = self.node, ?command, "PDS command");
        self.write_controlword(command.controlword())
    }

    /// Walk the state machine to `OperationEnabled`, resetting faults on the way.
    ///
    /// # Errors
    ///
    /// `Timeout` if `timeout` runs out before the drive is enabled,
    /// `InvalidState` if a fault cannot be cleared or the statusword does not
    /// decode to a PDS state.
    pub fn enable(&self, timeout: Duration) -> Result<()> {
        self.drive_to(DriveState::OperationEnabled, timeout, PdsCommand::towards_enabled)
    }

    /// Walk the state machine to `SwitchedOn`.
    ///
    /// # Errors
    ///
    /// As [`Drive::enable`].
    pub fn switch_on(&self, timeout: Duration) -> Result<()> {
        self.drive_to(DriveState::SwitchedOn, timeout, PdsCommand::towards_switched_on)
    }

    fn drive_to(
        &self,
        target: DriveState,
        timeout: Duration,
        step: fn(DriveState) -> Option<PdsCommand>,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout);
        loop {
            let seen = self.shared.statusword.snapshot();
            let state = DriveState::decode(seen.value);
            if state == target {
                info!(node = self.node, %state, "drive reached target state");
                return Ok(());
            }
            if state == DriveState::Unknown {
                return Err(self.undecodable(seen.value));
            }
            if state.is_fault() {
                self.fault_reset()?;
                deadline.remaining()?;
                continue;
            }
            if let Some(command) = step(state) {
                self.command(command)?;
            }
            self.shared.statusword.wait_change(seen.generation, &deadline)?;
        }
    }

    /// Command `DisableVoltage` until the drive reports `SwitchOnDisabled`.
    /// Does nothing when already there.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the drive is faulted or its state is not
    /// decodable; `Timeout` if one step takes longer than the configured PDS
    /// timeout.
    pub fn disable(&self) -> Result<()> {
        loop {
            let seen = self.shared.statusword.snapshot();
            let state = DriveState::decode(seen.value);
            if state == DriveState::SwitchOnDisabled {
                return Ok(());
            }
            if state == DriveState::Unknown {
                return Err(self.undecodable(seen.value));
            }
            if state.is_fault() {
                return Err(ServoError::invalid_state(format!(
                    "node {} is in {state}, reset the fault before disabling",
                    self.node
                )));
            }
            self.command(PdsCommand::DisableVoltage)?;
            self.shared
                .statusword
                .wait_change(seen.generation, &Deadline::after(self.config.pds_timeout()))?;
        }
    }

    /// Clear a fault with a `0` then `FaultReset` controlword pair, retrying
    /// while the fault persists.
    ///
    /// # Errors
    ///
    /// `InvalidState` once the retry bound is exhausted.
    pub fn fault_reset(&self) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let seen = self.shared.statusword.snapshot();
            let state = DriveState::decode(seen.value);
            if !state.is_fault() {
                if attempts > 0 {
                    info!(node = self.node, attempts, "fault cleared");
                }
                return Ok(());
            }
            if attempts >= self.config.fault_reset_retries {
                return Err(ServoError::invalid_state(format!(
                    "node {} still in {state} after {attempts} reset attempts",
                    self.node
                )));
            }
            attempts += 1;
            debug!(node = self.node, attempt = attempts, "resetting fault");

            self.write_controlword(0)?;
            self.command(PdsCommand::FaultReset)?;
            match self
                .shared
                .statusword
                .wait_change(seen.generation, &Deadline::after(self.config.pds_timeout()))
            {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Timeout => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub fn homing_start(&self) -> Result<()> {
        self.write_controlword(cw::HOMING_START | PdsCommand::EnableOperation.controlword())
    }

    /// Wait for the homing procedure started by [`Drive::homing_start`].
    ///
    /// # Errors
    ///
    /// `Homing(..)` with the reason reported by the drive, or `Timeout`.
    pub fn homing_wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        loop {
            let seen = self.shared.statusword.snapshot();
            match HomingStatus::decode(seen.value) {
                HomingStatus::InProgress => {
                    self.shared.statusword.wait_change(seen.generation, &deadline)?;
                }
                HomingStatus::Completed => {
                    info!(node = self.node, "homing completed");
                    return Ok(());
                }
                HomingStatus::Failed(reason) => {
                    warn!(node = self.node, %reason, "homing failed");
                    return Err(ServoError::Homing(reason));
                }
            }
        }
    }

    /// Write a target position. When enabled in profile-position mode the
    /// new set-point handshake follows, each acknowledge wait bounded by
    /// `timeout` (the configured set-point timeout when `None`).
    ///
    /// # Errors
    ///
    /// `Timeout` if the drive never acknowledges the set-point.
    pub fn position_set(
        &self,
        position: i32,
        immediate: bool,
        relative: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.transport
            .write_i32(self.node, self.config.registers.target_position, position, true)?;

        let (state, _) = self.state();
        let mode = *self.mode.lock();
        if state != DriveState::OperationEnabled || mode != OperationMode::ProfilePosition {
            return Ok(());
        }

        let timeout = timeout.unwrap_or_else(|| self.config.setpoint_timeout());
        let enable = PdsCommand::EnableOperation.controlword();
        self.write_controlword(enable)?;
        self.shared
            .statusword
            .wait_value(sw::SETPOINT_ACK, 0, &Deadline::after(timeout))?;

        let mut controlword = enable | cw::NEW_SETPOINT;
        if immediate {
            controlword |= cw::IMMEDIATE;
        }
        if relative {
            controlword |= cw::RELATIVE;
        }
        self.write_controlword(controlword)?;
        self.shared
            .statusword
            .wait_value(sw::SETPOINT_ACK, sw::SETPOINT_ACK, &Deadline::after(timeout))?;
        debug!(node = self.node, position, immediate, relative, "set-point acknowledged");
        Ok(())
    }

    /// Block until the target-reached bit is set.
    pub fn wait_reached(&self, timeout: Duration) -> Result<()> {
        self.shared
            .statusword
            .wait_value(sw::TARGET_REACHED, sw::TARGET_REACHED, &Deadline::after(timeout))?;
        Ok(())
    }

    /// Read the active mode. Codes the library does not know read as
    /// profile position.
    pub fn mode_get(&self) -> Result<OperationMode> {
        let code = self
            .transport
            .read_i8(self.node, self.config.registers.operation_mode_display)?;
        Ok(OperationMode::from_code(code).unwrap_or_else(|| {
            debug!(node = self.node, code, "unknown operation mode code");
            OperationMode::ProfilePosition
        }))
    }

    pub fn mode_set(&self, mode: OperationMode) -> Result<()> {
        self.transport
            .write_i8(self.node, self.config.registers.operation_mode, mode.code(), true)?;
        *self.mode.lock() = mode;
        Ok(())
    }

    pub fn position_get(&self) -> Result<i32> {
        self.transport.read_i32(self.node, self.config.registers.actual_position)
    }

    pub fn velocity_get(&self) -> Result<i32> {
        self.transport.read_i32(self.node, self.config.registers.actual_velocity)
    }

    pub fn velocity_set(&self, velocity: i32) -> Result<()> {
        self.transport
            .write_i32(self.node, self.config.registers.target_velocity, velocity, true)
    }

    pub fn torque_get(&self) -> Result<i16> {
        self.transport.read_i16(self.node, self.config.registers.actual_torque)
    }

    pub fn torque_set(&self, torque: i16) -> Result<()> {
        self.transport
            .write_i16(self.node, self.config.registers.target_torque, torque, true)
    }

    /// Read a register and convert it to application units.
    pub fn read_scaled(&self, descriptor: &RegisterDescriptor) -> Result<f64> {
        let raw = self.transport.read_register(self.node, descriptor)?;
        Ok(raw.as_f64() * self.scale.factor(descriptor.phy))
    }

    /// Convert `value` from application units and write it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero factor or a value outside the
    /// register's range.
    pub fn write_scaled(&self, descriptor: &RegisterDescriptor, value: f64, confirm: bool) -> Result<()> {
        let factor = self.scale.factor(descriptor.phy);
        if factor.abs() < f64::EPSILON || !factor.is_finite() {
            return Err(ServoError::invalid_argument(format!(
                "unusable scale factor {factor} for {:?}",
                descriptor.phy
            )));
        }
        let raw = Value::from_f64(descriptor.dtype, value / factor);
        self.transport.write_register(self.node, descriptor, raw, confirm)
    }

    /// Register `callback` for decoded state changes. It runs on the
    /// transport's dispatch thread and must not block.
    pub fn subscribe_state(&self, callback: StateCallback) -> StateToken {
        let mut observers = self.shared.observers.lock();
        if let Some((index, slot)) = observers.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(callback);
            return StateToken(index);
        }
        observers.push(Some(callback));
        StateToken(observers.len() - 1)
    }

    /// # Errors
    ///
    /// `InvalidArgument` if `token` is not subscribed.
    pub fn unsubscribe_state(&self, token: StateToken) -> Result<()> {
        let mut observers = self.shared.observers.lock();
        match observers.get_mut(token.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(ServoError::invalid_argument(format!(
                "no state subscriber in slot {}",
                token.0
            ))),
        }
    }

    /// Oldest pending emergency code.
    ///
    /// # Errors
    ///
    /// `Timeout` if none arrives within `timeout`.
    pub fn next_emergency(&self, timeout: Duration) -> Result<u32> {
        self.shared.emergencies.pop(timeout)
    }

    /// Emergency codes lost because the queue was full.
    pub fn emergency_dropped(&self) -> u64 {
        self.shared.emergencies.dropped()
    }
}

fn release<T: Transport + ?Sized>(
    transport: &T,
    node: u8,
    statusword: SlotToken,
    emergency: Option<SlotToken>,
) {
    if let Err(e) = transport.unsubscribe_statusword(statusword) {
        warn!(node, error = %e, "failed to release statusword subscription");
    }
    if let Some(token) = emergency
        && let Err(e) = transport.unsubscribe_emergency(token)
    {
        warn!(node, error = %e, "failed to release emergency subscription");
    }
}

impl<T: Transport + ?Sized> Drop for Drive<T> {
    fn drop(&mut self) {
        release(
            &*self.transport,
            self.node,
            self.statusword_token,
            Some(self.emergency_token),
        );
        debug!(node = self.node, "drive detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitScale;
    use servolink_frame::RegisterAddress;
    use servolink_transport::mock::{Protocol, VirtualDrive};
    use servolink_transport::serial::STATUSWORD;
    use servolink_transport::{Access, AsyncSerialTransport, Channel, DataType, PhysicalUnit, SerialConfig};
    use tracing_test::traced_test;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const VELOCITY: RegisterAddress = RegisterAddress::new(0x60FF, 0);

    fn attach(sim: &VirtualDrive) -> std::result::Result<Drive<AsyncSerialTransport>, Box<dyn std::error::Error>> {
        sim.set_register(2, STATUSWORD, &0x0040u16.to_le_bytes());
        let host = sim.connect_channel()?;
        let config = SerialConfig::builder().init_wait_ms(0).build()?;
        let transport = Arc::new(AsyncSerialTransport::new(host as Arc<dyn Channel>, config)?);
        transport.connect()?;
        Ok(Drive::new(transport, 2, DriveConfig::default())?)
    }

    #[test]
    #[traced_test]
    fn test_attach_is_logged() -> TestResult {
        let sim = VirtualDrive::new(Protocol::AsyncSerial);
        let drive = attach(&sim)?;
        assert_eq!(drive.state().0, DriveState::SwitchOnDisabled);
        assert!(logs_contain("drive attached"));
        drop(drive);
        assert!(logs_contain("drive detached"));
        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected_before_io() -> TestResult {
        let sim = VirtualDrive::new(Protocol::AsyncSerial);
        let host = sim.connect_channel()?;
        let transport = Arc::new(AsyncSerialTransport::new(
            host as Arc<dyn Channel>,
            SerialConfig::default(),
        )?);
        let config = DriveConfig {
            pds_timeout_ms: 0,
            ..DriveConfig::default()
        };
        let err = Drive::new(transport, 2, config).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
        Ok(())
    }

    #[test]
    fn test_scaled_access() -> TestResult {
        let sim = VirtualDrive::new(Protocol::AsyncSerial);
        let drive = attach(&sim)?.with_scale(Arc::new(UnitScale::revolutions(4096)));
        let velocity = RegisterDescriptor::new(VELOCITY, DataType::S32, Access::ReadWrite)
            .with_unit(PhysicalUnit::Velocity);

        drive.write_scaled(&velocity, 2.5, true)?;
        assert_eq!(sim.register(2, VELOCITY), Some(10240i32.to_le_bytes().to_vec()));

        sim.set_register(2, VELOCITY, &(-2048i32).to_le_bytes());
        let read = drive.read_scaled(&velocity)?;
        assert!((read + 0.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_zero_scale_factor_is_rejected() -> TestResult {
        let sim = VirtualDrive::new(Protocol::AsyncSerial);
        let scale = UnitScale {
            torque: 0.0,
            ..UnitScale::default()
        };
        let drive = attach(&sim)?.with_scale(Arc::new(scale));
        let torque = RegisterDescriptor::new(RegisterAddress::new(0x6071, 0), DataType::S16, Access::ReadWrite)
            .with_unit(PhysicalUnit::Torque);
        let err = drive.write_scaled(&torque, 1.0, false).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
        Ok(())
    }

    #[test]
    fn test_typed_motion_helpers() -> TestResult {
        let sim = VirtualDrive::new(Protocol::AsyncSerial);
        sim.set_register(2, RegisterAddress::new(0x6064, 0), &(-77i32).to_le_bytes());
        sim.set_register(2, RegisterAddress::new(0x6077, 0), &125i16.to_le_bytes());
        let drive = attach(&sim)?;

        assert_eq!(drive.position_get()?, -77);
        assert_eq!(drive.torque_get()?, 125);
        drive.velocity_set(300)?;
        drive.torque_set(-40)?;
        assert_eq!(sim.register(2, VELOCITY), Some(300i32.to_le_bytes().to_vec()));
        assert_eq!(
            sim.register(2, RegisterAddress::new(0x6071, 0)),
            Some((-40i16).to_le_bytes().to_vec())
        );
        Ok(())
    }
}
