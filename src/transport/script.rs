use super::{Error, Transport};

use std::collections::VecDeque;

/// One interaction with the device, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(Vec<u8>),
    Receive(usize),
}

/// A device that answers from a script and remembers everything it was asked.
///
/// Replies are consumed in order. A reply longer than the requested length is
/// split and the remainder is handed out by the next receive.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    fallback: Option<Vec<u8>>,
    calls: Vec<Call>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, reply: Vec<u8>) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub fn replies<I: IntoIterator<Item = Vec<u8>>>(mut self, replies: I) -> Self {
        self.replies.extend(replies);
        self
    }

    /// Answer with `reply` once the script runs dry instead of failing.
    pub fn fallback(mut self, reply: Vec<u8>) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Just the payloads that went out, in order.
    pub fn sent(&self) -> Vec<&[u8]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Send(data) => Some(data.as_slice()),
                Call::Receive(_) => None,
            })
            .collect()
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.calls.push(Call::Send(data.to_vec()));
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, Error> {
        self.calls.push(Call::Receive(max_len));

        let mut reply = match self.replies.pop_front() {
            Some(reply) => reply,
            None => self.fallback.clone().ok_or(Error::ScriptExhausted)?,
        };

        if reply.len() > max_len {
            let rest = reply.split_off(max_len);
            self.replies.push_front(rest);
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_long_replies() {
        let mut transport = ScriptedTransport::new().reply(vec![1, 2, 3, 4]);

        assert_eq!(transport.receive(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(transport.receive(3).unwrap(), vec![4]);
        assert_eq!(transport.receive(3), Err(Error::ScriptExhausted));
    }

    #[test]
    fn records_calls_and_uses_fallback() {
        let mut transport = ScriptedTransport::new().fallback(vec![0xaa]);

        transport.send(&[1, 2]).unwrap();
        assert_eq!(transport.receive(8).unwrap(), vec![0xaa]);
        assert_eq!(
            transport.calls(),
            &[Call::Send(vec![1, 2]), Call::Receive(8)]
        );
        assert_eq!(transport.sent(), vec![&[1u8, 2][..]]);
    }
}
