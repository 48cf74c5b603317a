use alloc::vec::Vec;

use ruuvi_common::waker_registration::WakerSlot;

use super::LineTest;

/// Which line answers a command.
pub(crate) enum Expect {
    /// The first line that is not empty, not the echo of the command and not an unsolicited
    /// `+` notice.
    Reply,
    /// The first line passing the test.
    Line(LineTest),
}

/// The one outstanding command of a parser.
pub(crate) struct PendingCommand {
    sent: Vec<u8>,
    expect: Expect,
    response: Option<Vec<u8>>,
    waker: WakerSlot,
}

impl PendingCommand {
    pub(crate) fn new(sent: &[u8], expect: Expect) -> Self {
        Self {
            sent: sent.to_vec(),
            expect,
            response: None,
            waker: WakerSlot::new(),
        }
    }

    /// Offer a framed line, true if it was taken as the response.
    pub(crate) fn offer(&mut self, line: &[u8]) -> bool {
        if self.response.is_some() || !self.accepts(line) {
            return false;
        }
        self.response = Some(line.to_vec());
        self.waker.wake();
        true
    }

    fn accepts(&self, line: &[u8]) -> bool {
        match &self.expect {
            Expect::Reply => {
                !line.is_empty() && line != self.sent.as_slice() && !line.starts_with(b"+")
            }
            Expect::Line(test) => test.matches(line),
        }
    }

    pub(crate) fn take_response(&mut self) -> Option<Vec<u8>> {
        self.response.take()
    }

    pub(crate) fn waker(&self) -> &WakerSlot {
        &self.waker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolver_skips_echo_blank_and_notices() {
        let mut pending = PendingCommand::new(b"AT+CSQ", Expect::Reply);
        assert!(!pending.offer(b""));
        assert!(!pending.offer(b"AT+CSQ"));
        assert!(!pending.offer(b"+CREG: 1"));
        assert!(pending.offer(b"OK"));
        // Only the first response is taken.
        assert!(!pending.offer(b"ERROR"));
        assert_eq!(pending.take_response().as_deref(), Some(&b"OK"[..]));
    }

    #[test]
    fn expected_line() {
        let mut pending = PendingCommand::new(
            b"$PMTK300,1000,0,0,0,0*1C",
            Expect::Line(LineTest::prefix("$PMTK001,300")),
        );
        assert!(!pending.offer(b"$GPRMC,,V,,,,,,,,,,N*53"));
        assert!(pending.offer(b"$PMTK001,300,3*33"));
    }
}
