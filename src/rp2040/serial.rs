pub struct PortInfo {
    pub port: String,
    pub description: String,
}

pub struct SerialDevice {
    serial: serial2::SerialPort,
    read_timeout: std::time::Duration,
    write_timeout: std::time::Duration,
}

impl SerialDevice {
    const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);
    const DEFAULT_RW_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
    const BUFFER_SIZE: usize = 4 * 1024;

    pub fn new(
        port: &str,
        baud: u32,
        read_timeout: Option<std::time::Duration>,
        write_timeout: Option<std::time::Duration>,
    ) -> std::io::Result<Self> {
        let mut device = Self {
            serial: serial2::SerialPort::open(port, baud)?,
            read_timeout: read_timeout.unwrap_or(Self::DEFAULT_RW_TIMEOUT),
            write_timeout: write_timeout.unwrap_or(Self::DEFAULT_RW_TIMEOUT),
        };
        device.serial.set_read_timeout(Self::POLL_TIMEOUT)?;
        device.serial.set_write_timeout(device.write_timeout)?;
        Ok(device)
    }

    pub fn list() -> std::io::Result<Vec<PortInfo>> {
        let mut ports = vec![];

        for port in serialport::available_ports()? {
            let description = match port.port_type {
                serialport::SerialPortType::UsbPort(info) => format!(
                    "USB {:04X}:{:04X} {}",
                    info.vid,
                    info.pid,
                    info.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            ports.push(PortInfo {
                port: port.port_name,
                description,
            });
        }

        Ok(ports)
    }

    pub fn set_read_timeout(&mut self, timeout: std::time::Duration) {
        self.read_timeout = timeout;
    }

    pub fn discard_input(&mut self) -> std::io::Result<()> {
        let timeout = std::time::Instant::now();
        self.serial.discard_input_buffer()?;
        loop {
            match self.serial.read(&mut [0u8; Self::BUFFER_SIZE]) {
                Ok(_) => {}
                Err(error) => match error.kind() {
                    std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock => {
                        return Ok(());
                    }
                    _ => return Err(error),
                },
            };
            if timeout.elapsed() > self.read_timeout {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
        }
    }

    /// Fills the whole buffer or fails once the read timeout expires.
    pub fn read_exact_timeout(&mut self, buffer: &mut [u8]) -> std::io::Result<()> {
        let timeout = std::time::Instant::now();
        let mut position = 0;
        while position < buffer.len() {
            if timeout.elapsed() > self.read_timeout {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            match self.serial.read(&mut buffer[position..]) {
                Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                Ok(bytes) => position += bytes,
                Err(error) => match error.kind() {
                    std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock => {}
                    _ => return Err(error),
                },
            }
        }
        Ok(())
    }
}

impl std::io::Write for SerialDevice {
    fn write(&mut self, buffer: &[u8]) -> std::io::Result<usize> {
        self.serial.write(buffer)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.serial.flush()
    }
}
