//! Dual-mode process data access.
//!
//! Every operation addresses `size` channels of one module starting at
//! `offset` inside that module's span of the process image. What happens
//! next depends on the poll period:
//!
//! - **Direct mode** (period zero): one request goes straight to the
//!   coupler on the process-data channel and the call blocks for the answer.
//! - **Buffered mode**: reads copy from the process image and writes stage
//!   into it. The poll cycle exchanges the image with the coupler.
//!
//! Validation runs before any traffic, in this order: connection, module
//! index, zero size, channel kind, span bounds.

use std::sync::Arc;

use tracing::trace;

use crate::condition::{Condition, ConditionKind};
use crate::coupler::{Coupler, Session};
use crate::error::Result;
use crate::image::IoKind;
use crate::module;
use crate::request::{Request, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS};
use crate::transport::Channel;
use crate::utils::{bytes_to_words, pack_bits, packed_len, unpack_bits, words_to_bytes};

/// A validated access: the live session and the absolute buffer position.
struct Target {
    session: Arc<Session>,
    module: usize,
    start: usize,
}

impl Coupler {
    /// Reads `size` digital inputs of `module` starting at `offset`.
    ///
    /// # Errors
    ///
    /// A [`Condition`] error, also reported to the condition handler:
    /// `ConnectionLost`, `InvalidModuleIndex`, `NoDigitalInputData`,
    /// `InvalidDataSize`, or a mapped transport failure in direct mode.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use coupler_io::{Coupler, CouplerConfig};
    ///
    /// let coupler = Coupler::new(CouplerConfig::new());
    /// coupler.connect("192.168.100.1", 502)?;
    /// let inputs = coupler.read_digital_inputs(0, 0, 8)?;
    /// assert_eq!(inputs.len(), 8);
    /// # Ok::<(), coupler_io::CouplerError>(())
    /// ```
    pub fn read_digital_inputs(&self, module: usize, offset: usize, size: usize) -> Result<Vec<bool>> {
        self.read_bits(IoKind::DigitalIn, module, offset, size)
    }

    /// Reads back `size` digital outputs of `module` starting at `offset`.
    ///
    /// In buffered mode this returns the staged values, not the coupler's.
    pub fn read_digital_outputs(&self, module: usize, offset: usize, size: usize) -> Result<Vec<bool>> {
        self.read_bits(IoKind::DigitalOut, module, offset, size)
    }

    /// Writes digital outputs of `module` starting at `offset`.
    pub fn write_digital_outputs(&self, module: usize, offset: usize, values: &[bool]) -> Result<()> {
        let target = self.locate(IoKind::DigitalOut, module, offset, values.len())?;
        if !self.shared.is_direct() {
            return self.stage(&target, |image| {
                image.write_bits(IoKind::DigitalOut, target.start, values)
            });
        }
        let count = self.direct_count(&target, values.len(), MAX_WRITE_BITS)?;
        let request = Request::WriteMultipleCoils {
            address: self.direct_address(&target, IoKind::DigitalOut)?,
            count,
            data: pack_bits(values),
        };
        trace!(module, offset, count, "direct digital write");
        self.shared
            .execute(&target.session, Channel::Value, &request, Some(module))
            .map(drop)
    }

    /// Reads `size` analog inputs of `module` starting at `offset`.
    pub fn read_analog_inputs(&self, module: usize, offset: usize, size: usize) -> Result<Vec<u16>> {
        self.read_words(IoKind::AnalogIn, module, offset, size)
    }

    /// Reads back `size` analog outputs of `module` starting at `offset`.
    pub fn read_analog_outputs(&self, module: usize, offset: usize, size: usize) -> Result<Vec<u16>> {
        self.read_words(IoKind::AnalogOut, module, offset, size)
    }

    /// Writes analog outputs of `module` starting at `offset`.
    pub fn write_analog_outputs(&self, module: usize, offset: usize, values: &[u16]) -> Result<()> {
        let target = self.locate(IoKind::AnalogOut, module, offset, values.len())?;
        if !self.shared.is_direct() {
            return self.stage(&target, |image| {
                image.write_words(IoKind::AnalogOut, target.start, values)
            });
        }
        self.direct_count(&target, values.len(), MAX_WRITE_REGISTERS)?;
        let request = Request::WriteMultipleRegisters {
            address: self.direct_address(&target, IoKind::AnalogOut)?,
            data: words_to_bytes(values),
        };
        trace!(module, offset, count = values.len(), "direct analog write");
        self.shared
            .execute(&target.session, Channel::Value, &request, Some(module))
            .map(drop)
    }

    fn read_bits(&self, kind: IoKind, module: usize, offset: usize, size: usize) -> Result<Vec<bool>> {
        let target = self.locate(kind, module, offset, size)?;
        if !self.shared.is_direct() {
            return self.snapshot(&target, |image| image.read_bits(kind, target.start, size));
        }
        let count = self.direct_count(&target, size, MAX_READ_BITS)?;
        let address = self.direct_address(&target, kind)?;
        let request = match kind {
            IoKind::DigitalIn => Request::ReadDiscreteInputs { address, count },
            _ => Request::ReadCoils { address, count },
        };
        trace!(module, offset, count, %kind, "direct read");
        let data = self
            .shared
            .execute(&target.session, Channel::Value, &request, Some(module))?;
        if data.len() < packed_len(size) {
            return Err(self.reject(&target, ConditionKind::EmptyResponse));
        }
        Ok(unpack_bits(&data, size))
    }

    fn read_words(&self, kind: IoKind, module: usize, offset: usize, size: usize) -> Result<Vec<u16>> {
        let target = self.locate(kind, module, offset, size)?;
        if !self.shared.is_direct() {
            return self.snapshot(&target, |image| image.read_words(kind, target.start, size));
        }
        let count = self.direct_count(&target, size, MAX_READ_REGISTERS)?;
        let address = self.direct_address(&target, kind)?;
        let request = match kind {
            IoKind::AnalogIn => Request::ReadInputRegisters { address, count },
            _ => Request::ReadHoldingRegisters { address, count },
        };
        trace!(module, offset, count, %kind, "direct read");
        let data = self
            .shared
            .execute(&target.session, Channel::Value, &request, Some(module))?;
        let mut words = bytes_to_words(&data);
        if words.len() < size {
            return Err(self.reject(&target, ConditionKind::EmptyResponse));
        }
        words.truncate(size);
        Ok(words)
    }

    /// Checks an access and resolves its absolute buffer position.
    fn locate(&self, kind: IoKind, module: usize, offset: usize, size: usize) -> Result<Target> {
        let reject = |condition: ConditionKind| {
            self.shared
                .fail(Condition::new(condition).with_module(module))
        };

        let Some(session) = self.shared.session() else {
            return Err(reject(ConditionKind::ConnectionLost));
        };
        if module >= session.modules.len() {
            return Err(reject(ConditionKind::InvalidModuleIndex));
        }
        if size == 0 {
            return Err(reject(ConditionKind::InvalidDataSize));
        }
        let buffer_len = session.summary.buffer_len(kind);
        let Some(span) = module::span(&session.modules, module, kind, buffer_len) else {
            return Err(reject(ConditionKind::missing_channel(kind)));
        };
        let start = span.start.checked_add(offset);
        match start.and_then(|start| start.checked_add(size)) {
            Some(end) if end <= span.end => {}
            _ => return Err(reject(ConditionKind::InvalidDataSize)),
        }

        Ok(Target {
            session,
            module,
            start: span.start + offset,
        })
    }

    fn reject(&self, target: &Target, kind: ConditionKind) -> crate::error::CouplerError {
        self.shared
            .fail(Condition::new(kind).with_module(target.module))
    }

    fn direct_count(&self, target: &Target, size: usize, limit: u16) -> Result<u16> {
        u16::try_from(size)
            .ok()
            .filter(|&count| count <= limit)
            .ok_or_else(|| self.reject(target, ConditionKind::InvalidDataSize))
    }

    fn direct_address(&self, target: &Target, kind: IoKind) -> Result<u16> {
        u16::try_from(target.start)
            .ok()
            .and_then(|start| kind.base_address().checked_add(start))
            .ok_or_else(|| self.reject(target, ConditionKind::InvalidDataSize))
    }

    /// Reads from the live image of the target's session.
    fn snapshot<T>(
        &self,
        target: &Target,
        read: impl FnOnce(&crate::image::ProcessImage) -> Option<T>,
    ) -> Result<T> {
        let value = {
            let io = self.shared.io.lock();
            io.as_ref()
                .filter(|state| state.generation == target.session.generation)
                .and_then(|state| read(&state.image))
        };
        value.ok_or_else(|| self.reject(target, ConditionKind::ConnectionLost))
    }

    /// Writes into the live image of the target's session.
    fn stage(
        &self,
        target: &Target,
        write: impl FnOnce(&mut crate::image::ProcessImage) -> bool,
    ) -> Result<()> {
        let staged = {
            let mut io = self.shared.io.lock();
            io.as_mut()
                .filter(|state| state.generation == target.session.generation)
                .is_some_and(|state| write(&mut state.image))
        };
        if staged {
            Ok(())
        } else {
            Err(self.reject(target, ConditionKind::ConnectionLost))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::condition::ConditionKind;
    use crate::coupler::{Coupler, CouplerConfig};
    use crate::request::Request;
    use crate::response::ExceptionCode;
    use crate::testing::{two_module_device, MockDevice, MockFailure, Recorder};
    use crate::transport::Channel;

    fn coupler(device: &MockDevice, poll_period: Duration) -> (Coupler, Recorder) {
        let config = CouplerConfig::new()
            .with_poll_period(poll_period)
            .with_reconnect_cooldown(Duration::from_millis(10));
        let coupler = Coupler::with_connector(config, device.clone());
        let recorder = Recorder::new();
        coupler.set_condition_handler(recorder.clone());
        coupler.connect("10.0.0.2", 502).unwrap();
        device.clear_requests();
        (coupler, recorder)
    }

    fn buffered(device: &MockDevice) -> (Coupler, Recorder) {
        coupler(device, Duration::from_secs(60))
    }

    fn direct(device: &MockDevice) -> (Coupler, Recorder) {
        coupler(device, Duration::ZERO)
    }

    fn poll(coupler: &Coupler, ticks: usize) {
        for _ in 0..ticks {
            assert!(coupler.poll_once());
        }
    }

    #[test]
    fn test_invalid_module_index_never_reaches_transport() {
        let device = two_module_device();
        let (coupler, recorder) = direct(&device);

        let err = coupler.read_digital_inputs(2, 0, 1).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::InvalidModuleIndex));
        let err = coupler.write_analog_outputs(7, 0, &[1]).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::InvalidModuleIndex));

        assert_eq!(device.request_count(), 0);
        assert_eq!(
            recorder.kinds(),
            vec![ConditionKind::InvalidModuleIndex, ConditionKind::InvalidModuleIndex]
        );
        assert_eq!(recorder.conditions()[0].module, Some(2));
        assert!(coupler.is_connected());
    }

    #[test]
    fn test_validation_order() {
        let device = two_module_device();
        let (coupler, _) = direct(&device);

        let zero = coupler.read_analog_outputs(0, 0, 0).unwrap_err();
        assert_eq!(zero.kind(), Some(ConditionKind::InvalidDataSize));

        let missing = coupler.read_analog_outputs(0, 0, 1).unwrap_err();
        assert_eq!(missing.kind(), Some(ConditionKind::NoAnalogOutputData));
        let missing = coupler.read_analog_inputs(1, 0, 1).unwrap_err();
        assert_eq!(missing.kind(), Some(ConditionKind::NoAnalogInputData));

        let too_far = coupler.read_digital_inputs(0, 4, 5).unwrap_err();
        assert_eq!(too_far.kind(), Some(ConditionKind::InvalidDataSize));
        let huge = coupler.read_digital_inputs(0, usize::MAX, 1).unwrap_err();
        assert_eq!(huge.kind(), Some(ConditionKind::InvalidDataSize));

        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn test_requires_connection() {
        let device = two_module_device();
        let coupler = Coupler::with_connector(CouplerConfig::new(), device.clone());
        let recorder = Recorder::new();
        coupler.set_condition_handler(recorder.clone());

        let err = coupler.write_digital_outputs(0, 0, &[true]).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::ConnectionLost));
        assert_eq!(recorder.kinds(), vec![ConditionKind::ConnectionLost]);
        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn test_module_spans() {
        let device = two_module_device();
        let (coupler, _) = buffered(&device);
        assert_eq!(coupler.read_digital_inputs(0, 0, 8).unwrap().len(), 8);
        assert!(coupler.read_digital_inputs(0, 0, 9).is_err());
        assert_eq!(coupler.read_digital_inputs(1, 0, 16).unwrap().len(), 16);
        assert!(coupler.read_digital_inputs(1, 0, 17).is_err());
        assert_eq!(coupler.read_analog_inputs(0, 0, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_buffered_scenario_two_modules() {
        let device = two_module_device();
        let (coupler, recorder) = buffered(&device);

        coupler.write_digital_outputs(1, 0, &[true]).unwrap();
        assert_eq!(device.request_count(), 0);

        // watchdog, digital-in, digital-out
        poll(&coupler, 3);
        assert!(device.coil(8));
        assert!(!device.coil(0));
        assert_eq!(coupler.read_digital_outputs(1, 0, 1).unwrap(), vec![true]);
        assert_eq!(coupler.read_digital_outputs(0, 0, 1).unwrap(), vec![false]);
        assert!(recorder.conditions().is_empty());
    }

    #[test]
    fn test_buffered_analog_round_trip() {
        let device = two_module_device();
        let (coupler, _) = buffered(&device);

        coupler.write_analog_outputs(1, 0, &[0x1234]).unwrap();
        poll(&coupler, 5);
        assert_eq!(device.register(0x0800), 0x1234);
        assert_eq!(coupler.read_analog_outputs(1, 0, 1).unwrap(), vec![0x1234]);
        assert_eq!(
            device.requests().last(),
            Some(&(
                Channel::AnalogOut,
                Request::WriteMultipleRegisters {
                    address: 0x0800,
                    data: vec![0x12, 0x34]
                }
            ))
        );
    }

    #[test]
    fn test_buffered_inputs_follow_poll() {
        let device = two_module_device();
        device.set_discrete_input(9, true);
        device.set_input_register(1, 500);
        let (coupler, _) = buffered(&device);

        assert_eq!(coupler.read_digital_inputs(1, 1, 1).unwrap(), vec![false]);
        poll(&coupler, 2);
        assert_eq!(coupler.read_digital_inputs(1, 0, 2).unwrap(), vec![false, true]);
        poll(&coupler, 2);
        assert_eq!(coupler.read_analog_inputs(0, 0, 2).unwrap(), vec![0, 500]);
        assert_eq!(coupler.process_image().unwrap().analog_in(), &[0, 500]);
    }

    #[test]
    fn test_buffered_after_disconnect() {
        let device = two_module_device();
        let (coupler, _) = buffered(&device);
        coupler.disconnect();
        let err = coupler.read_digital_inputs(0, 0, 1).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::ConnectionLost));
    }

    #[test]
    fn test_direct_digital_access() {
        let device = two_module_device();
        device.set_discrete_input(11, true);
        let (coupler, _) = direct(&device);

        assert_eq!(
            coupler.read_digital_inputs(1, 2, 3).unwrap(),
            vec![false, true, false]
        );
        assert_eq!(
            device.requests(),
            vec![(Channel::Value, Request::ReadDiscreteInputs { address: 10, count: 3 })]
        );

        coupler.write_digital_outputs(0, 2, &[true, true]).unwrap();
        assert!(device.coil(2) && device.coil(3));
        assert_eq!(
            coupler.read_digital_outputs(0, 1, 3).unwrap(),
            vec![false, true, true]
        );
        assert!(coupler.process_image().unwrap().digital_out().iter().all(|bit| !bit));
    }

    #[test]
    fn test_direct_analog_access() {
        let device = two_module_device();
        device.set_input_register(1, 42);
        let (coupler, _) = direct(&device);

        assert_eq!(coupler.read_analog_inputs(0, 1, 1).unwrap(), vec![42]);
        coupler.write_analog_outputs(1, 0, &[7]).unwrap();
        assert_eq!(device.register(0x0800), 7);
        assert_eq!(coupler.read_analog_outputs(1, 0, 1).unwrap(), vec![7]);
        assert_eq!(
            device.requests()[1],
            (
                Channel::Value,
                Request::WriteMultipleRegisters {
                    address: 0x0800,
                    data: vec![0x00, 0x07]
                }
            )
        );
    }

    #[test]
    fn test_direct_timeout_disconnects() {
        let device = two_module_device();
        let (coupler, recorder) = direct(&device);
        device.inject_failure(Channel::Value, MockFailure::Timeout, 1);

        let err = coupler.read_digital_inputs(0, 0, 1).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::Timeout));
        assert!(!coupler.is_connected());
        assert_eq!(recorder.kinds(), vec![ConditionKind::Timeout]);
        assert_eq!(recorder.conditions()[0].module, Some(0));
    }

    #[test]
    fn test_direct_exception_keeps_connection() {
        let device = two_module_device();
        let (coupler, recorder) = direct(&device);
        device.inject_failure(
            Channel::Value,
            MockFailure::Exception(ExceptionCode::IllegalDataAddress),
            1,
        );
        let err = coupler.write_analog_outputs(1, 0, &[1]).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::InvalidDataSize));
        assert!(coupler.is_connected());
        assert_eq!(recorder.kinds(), vec![ConditionKind::InvalidDataSize]);
    }

    #[test]
    fn test_direct_empty_response() {
        let device = two_module_device();
        let (coupler, recorder) = direct(&device);
        device.inject_failure(Channel::Value, MockFailure::Empty, 1);
        let err = coupler.read_analog_inputs(0, 0, 2).unwrap_err();
        assert_eq!(err.kind(), Some(ConditionKind::EmptyResponse));
        assert_eq!(recorder.kinds(), vec![ConditionKind::EmptyResponse]);
    }
}
