//! Interrupt dispatch
//!
//! One interrupt is serviced per call. The status register may report
//! several reasons at once; the highest-priority one is handled and the
//! others keep the line asserted until their turn.

use std::time::Instant;

use crate::domain::{DriverEvent, MostResult};
use crate::ports::{ControlLines, RegisterBus};
use crate::protocol::{decode_rx, op, RX_BUFFER_LEN};

use super::registers::*;
use super::{BringUp, Os8104};

/// Function id of a remote source allocation, whose status answer carries
/// the routing bytes for the local sink.
pub const FKT_SOURCE_ALLOCATE: u16 = 0x101;

/// Why the chip raised its interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    MessageReceived,
    Error,
    MessageTransmitted,
    NetworkChanged,
}

impl InterruptReason {
    /// Pick the reason to service from a bMSGS value.
    /// Priority: receive, error, transmit, network change.
    pub fn from_status(status: u8) -> Option<Self> {
        if status & MSGS_MESS_RECEIVED != 0 {
            Some(Self::MessageReceived)
        } else if status & MSGS_ERR != 0 {
            Some(Self::Error)
        } else if status & MSGS_MESS_TRANSMITTED != 0 {
            Some(Self::MessageTransmitted)
        } else if status & MSGS_NET_CHANGED != 0 {
            Some(Self::NetworkChanged)
        } else {
            None
        }
    }
}

impl<B: RegisterBus, L: ControlLines> Os8104<B, L> {
    /// Service one assertion of the interrupt line.
    pub fn handle_interrupt(&mut self, now: Instant) -> MostResult<()> {
        match self.bring_up {
            BringUp::AwaitingFirstInterrupt => return self.configure(now),
            BringUp::Operational => {}
            state => {
                log::debug!("Ignoring interrupt in {state:?}");
                return Ok(());
            }
        }

        let status = self.read(REG_MSGS)?;
        log::debug!("Interrupt, status 0x{status:02x}");
        match InterruptReason::from_status(status) {
            Some(InterruptReason::MessageReceived) => self.on_message_received(),
            Some(InterruptReason::Error) => self.on_error(now),
            Some(InterruptReason::MessageTransmitted) => self.on_message_transmitted(),
            Some(InterruptReason::NetworkChanged) => {
                log::info!("Network configuration changed");
                self.set_bits(REG_MSGC, MSGC_RESET_NET_CONF_CHANGE)
            }
            None => {
                log::info!("Unknown interrupt status 0x{status:02x}");
                Ok(())
            }
        }
    }

    fn on_message_received(&mut self) -> MostResult<()> {
        let buf = self.bus.read_registers(REG_MRCMB, RX_BUFFER_LEN)?;
        log::trace!("RX {buf:02x?}");
        match decode_rx(&buf) {
            Ok(msg) => {
                if msg.function_id == FKT_SOURCE_ALLOCATE
                    && msg.op_type == op::STATUS
                    && msg.payload.len() >= 6
                {
                    let routing = [msg.payload[2], msg.payload[3], msg.payload[4], msg.payload[5]];
                    log::debug!("Captured sink routing {routing:02x?}");
                    self.sink_routing = Some(routing);
                }
                self.emit(DriverEvent::MostMessageRx(msg));
            }
            Err(e) => log::warn!("Discarding receive buffer: {e}"),
        }
        // Release the buffer for the next message
        self.set_bits(REG_MSGC, MSGC_RESET_MESSAGE_RX_INT | MSGC_RECEIVE_BUFF_EN)
    }

    fn on_error(&mut self, now: Instant) -> MostResult<()> {
        if !self.transceiver_locked {
            log::debug!("Error interrupt while unlocked, lock poll pending");
            return Ok(());
        }
        let xsr = self.read(REG_XSR)?;
        self.parse_fault(xsr, now)
    }

    fn on_message_transmitted(&mut self) -> MostResult<()> {
        self.set_bits(REG_MSGC, MSGC_RESET_MESSAGE_TX_INT)?;
        if let Some(pending) = self.pending.take() {
            self.resolve_mailbox(pending.kind)?;
            self.clear_bits(REG_MSGC, MSGC_START_TX)?;
        }
        self.emit(DriverEvent::MessageSent);
        self.continue_multipart()
    }
}
