/// An IEEE-1284 device id, e.g. `MFG:Dai Nippon Printing;MDL:DS40;CMD:DNPDS;SN:12345;`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceId {
    fields: Vec<(String, String)>,
}

impl DeviceId {
    pub fn parse(text: &str) -> Self {
        let fields = text
            .split(';')
            .filter_map(|field| {
                let (key, value) = field.split_once(':')?;
                let key = key.trim();

                (!key.is_empty()).then(|| (key.to_ascii_uppercase(), value.trim().to_owned()))
            })
            .collect();

        Self { fields }
    }

    /// Parse the raw reply of a GET_DEVICE_ID class request.
    /// The first two bytes are the big-endian length, which includes themselves.
    pub fn from_reply(reply: &[u8]) -> Option<Self> {
        if reply.len() < 2 {
            return None;
        }

        let len = (u16::from_be_bytes([reply[0], reply[1]]) as usize).clamp(2, reply.len());
        let text = String::from_utf8_lossy(&reply[2..len]);

        Some(Self::parse(&text))
    }

    fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.lookup(&["MFG", "MANUFACTURER"])
    }

    pub fn model(&self) -> Option<&str> {
        self.lookup(&["MDL", "MODEL"])
    }

    pub fn command_set(&self) -> Option<&str> {
        self.lookup(&["CMD", "COMMAND SET"])
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.lookup(&["SN", "SERN", "SERIALNUMBER"])
    }
}
