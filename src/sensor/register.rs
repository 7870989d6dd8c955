use super::{Address, DailyResetSensor, RegisterWrites, Registers, Sensor, SensorError, SensorInfo};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Encoding {
    Unsigned,
    TwosComplement,
    /// Most significant bit holds the sign, remaining bits the magnitude.
    SignMagnitude,
}

impl Encoding {
    fn decode(self, raw: u32, bits: u32) -> i64 {
        let sign_bit = 1u32 << (bits - 1);

        match self {
            Encoding::Unsigned => raw as i64,
            Encoding::TwosComplement if raw & sign_bit != 0 => raw as i64 - (1i64 << bits),
            Encoding::TwosComplement => raw as i64,
            Encoding::SignMagnitude => {
                let magnitude = (raw & (sign_bit - 1)) as i64;

                if raw & sign_bit != 0 {
                    -magnitude
                } else {
                    magnitude
                }
            },
        }
    }

    fn encode(self, raw: i64, bits: u32) -> Option<u32> {
        let sign_bit = 1i64 << (bits - 1);

        match self {
            Encoding::Unsigned => (0..(1i64 << bits)).contains(&raw).then_some(raw as u32),
            Encoding::TwosComplement => {
                (-sign_bit..sign_bit).contains(&raw).then_some((raw & ((1i64 << bits) - 1)) as u32)
            },
            Encoding::SignMagnitude if raw.unsigned_abs() >= sign_bit as u64 => None,
            Encoding::SignMagnitude if raw < 0 => Some(raw.unsigned_abs() as u32 | sign_bit as u32),
            Encoding::SignMagnitude => Some(raw as u32),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum WordOrder {
    /// `reg_address` holds the low word, `reg_address + 1` the high word.
    LowFirst,
    HighFirst,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Layout {
    Single,
    Double(WordOrder),
}

impl Layout {
    fn bits(self) -> u32 {
        match self {
            Layout::Single => 16,
            Layout::Double(_) => 32,
        }
    }
}

/// Sensor decoding a fixed point number from one or two consecutive 16-bit registers.
///
/// `value = raw * factor + offset`, where `raw` is interpreted according to the configured [`Encoding`].
#[derive(Debug, Clone)]
pub struct RegisterSensor {
    info: SensorInfo,
    reg_address: Address,
    factor: f64,
    offset: f64,
    encoding: Encoding,
    layout: Layout,
}

impl RegisterSensor {
    fn new(info: SensorInfo, reg_address: Address, factor: f64, encoding: Encoding, layout: Layout) -> Self {
        Self { info, reg_address, factor, offset: 0.0, encoding, layout }
    }

    pub fn single_register(info: SensorInfo, reg_address: Address, factor: f64) -> Self {
        Self::new(info, reg_address, factor, Encoding::Unsigned, Layout::Single)
    }

    pub fn double_register(info: SensorInfo, reg_address: Address, factor: f64, low_word_first: bool) -> Self {
        let order = if low_word_first {
            WordOrder::LowFirst
        } else {
            WordOrder::HighFirst
        };

        Self::new(info, reg_address, factor, Encoding::Unsigned, Layout::Double(order))
    }

    /// 15-bit magnitude, bit 15 is the sign.
    pub fn sign_magnitude_single_register(info: SensorInfo, reg_address: Address, factor: f64) -> Self {
        Self::new(info, reg_address, factor, Encoding::SignMagnitude, Layout::Single)
    }

    /// 31-bit magnitude, the high word is always stored at `reg_address` and carries the sign.
    pub fn sign_magnitude_double_register(info: SensorInfo, reg_address: Address, factor: f64) -> Self {
        Self::new(
            info,
            reg_address,
            factor,
            Encoding::SignMagnitude,
            Layout::Double(WordOrder::HighFirst),
        )
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Interprets the raw value as two's complement, has no effect on sign-magnitude sensors.
    pub fn signed(mut self) -> Self {
        if self.encoding == Encoding::Unsigned {
            self.encoding = Encoding::TwosComplement;
        }
        self
    }

    pub fn reset_daily(self) -> DailyResetSensor {
        DailyResetSensor::new(Box::new(self))
    }

    fn word_addresses(&self) -> (Address, Address) {
        let next = self.reg_address.wrapping_add(1);

        match self.layout {
            Layout::Single => (self.reg_address, self.reg_address),
            Layout::Double(WordOrder::LowFirst) => (next, self.reg_address),
            Layout::Double(WordOrder::HighFirst) => (self.reg_address, next),
        }
    }

    fn raw_value(&self, registers: &Registers) -> Option<u32> {
        match self.layout {
            Layout::Single => registers.get(&self.reg_address).map(|&word| u16::from_be_bytes(word) as u32),
            Layout::Double(_) => {
                let (high_address, low_address) = self.word_addresses();
                let high = u16::from_be_bytes(*registers.get(&high_address)?) as u32;
                let low = u16::from_be_bytes(*registers.get(&low_address)?) as u32;

                Some(high << 16 | low)
            },
        }
    }
}

impl Sensor for RegisterSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn read_value(&self, registers: &Registers) -> Result<Option<f64>, SensorError> {
        Ok(self.raw_value(registers).map(|raw| {
            let raw = self.encoding.decode(raw, self.layout.bits());
            raw as f64 * self.factor + self.offset
        }))
    }

    fn write_value(&self, value: &str) -> Result<RegisterWrites, SensorError> {
        let parsed: f64 = value.trim().parse().map_err(|_| SensorError::InvalidValue {
            name: self.info.name.clone(),
            value: value.to_owned(),
        })?;

        let scaled = ((parsed - self.offset) / self.factor).round();
        let out_of_range = || SensorError::OutOfRange { name: self.info.name.clone(), value: parsed };

        if !scaled.is_finite() {
            return Err(out_of_range());
        }

        let raw = self
            .encoding
            .encode(scaled as i64, self.layout.bits())
            .ok_or_else(out_of_range)?;

        let mut writes = RegisterWrites::new();

        match self.layout {
            Layout::Single => {
                writes.insert(self.reg_address, (raw as u16).to_be_bytes());
            },
            Layout::Double(_) => {
                let (high_address, low_address) = self.word_addresses();
                writes.insert(high_address, ((raw >> 16) as u16).to_be_bytes());
                writes.insert(low_address, (raw as u16).to_be_bytes());
            },
        }

        Ok(writes)
    }

    fn registers(&self) -> Vec<Address> {
        match self.layout {
            Layout::Single => vec![self.reg_address],
            Layout::Double(_) => vec![self.reg_address, self.reg_address.wrapping_add(1)],
        }
    }
}
