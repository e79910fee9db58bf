//! The serial conduit to the hardware adapter.
//!
//! The adapter talks a small framed protocol: four byte command frames,
//! followed by a payload for PUT and a synchronous reply for STATUS. The
//! conduit owns framing, synchronization and block receive; command
//! semantics live in the daemon.
//!
//! The port is either a raw character device (`/dev/tty*`, put into raw
//! 8N1 mode at 1 MBaud) or a `tcp://host:port` stream to a networked
//! adapter. The write half can be cloned off and shared with the control
//! API for forwarding configuration frames.
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;

use mdrived_core::codec::SYNC_PATTERN;
use mdrived_core::{ClientKind, Header};

/// Wire op codes.
pub const OP_HELLO: u8 = 0x01;
pub const OP_STATUS: u8 = 0x02;
pub const OP_GET: u8 = 0x03;
pub const OP_PUT: u8 = 0x04;
pub const OP_CANCEL: u8 = 0x05;
pub const OP_MAP: u8 = 0x06;
pub const OP_CONFIG: u8 = 0x07;
pub const OP_DEBUG: u8 = 0x08;

/// The adapter's sync greeting; two bytes with protocol and firmware
/// version follow it on the wire.
pub const HELLO_PATTERN: &[u8] = b"hlo!";
/// Our reply to a successful sync.
pub const DAEMON_GREETING: &[u8] = b"hi!";

/// Sections received during variable length PUT below this size are
/// headers, everything else is a record.
pub const HEADER_SIZE_LIMIT: usize = 200;

/// Inactivity bound for a single receive; running into it drops sync.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// A decoded command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub op: Op,
    args: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Hello,
    Status,
    Get,
    Put,
    Cancel,
    Map,
    Config,
    Debug,
}

impl Command {
    pub fn decode(frame: [u8; 4]) -> io::Result<Command> {
        let op = match frame[0] {
            OP_HELLO => Op::Hello,
            OP_STATUS => Op::Status,
            OP_GET => Op::Get,
            OP_PUT => Op::Put,
            OP_CANCEL => Op::Cancel,
            OP_MAP => Op::Map,
            OP_CONFIG => Op::Config,
            OP_DEBUG => Op::Debug,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid command op code: {:#04x}", other),
                ))
            }
        };
        Ok(Command {
            op,
            args: [frame[1], frame[2], frame[3]],
        })
    }

    #[inline]
    pub fn arg(&self, ix: usize) -> u8 {
        self.args[ix]
    }

    /// The drive number argument, valid range 1 to 8.
    pub fn drive(&self) -> io::Result<usize> {
        let d = self.args[0] as usize;
        if (1..=8).contains(&d) {
            Ok(d)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid drive number: {}", d),
            ))
        }
    }
}

/// Protocol and firmware versions reported by the adapter during sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub protocol: u8,
    pub firmware: u8,
}

/// A serial port with a cloneable write half.
pub trait Port: Read + Send {
    fn clone_writer(&self) -> io::Result<Box<dyn Write + Send>>;
}

impl Port for File {
    fn clone_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

impl Port for TcpStream {
    fn clone_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// The shared write half of the port.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

#[cfg(target_os = "linux")]
fn configure_tty(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // raw 8N1 at 1 MBaud, reads time out so a dead adapter drops sync
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, libc::B1000000);
        libc::cfsetospeed(&mut tio, libc::B1000000);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = (RECEIVE_TIMEOUT.as_secs() * 10) as libc::cc_t;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn configure_tty(_file: &File) -> io::Result<()> {
    Ok(())
}

fn open_port(device: &str) -> io::Result<Box<dyn Port>> {
    if let Some(addr) = device.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(RECEIVE_TIMEOUT))?;
        return Ok(Box::new(stream));
    }
    let file = OpenOptions::new().read(true).write(true).open(device)?;
    configure_tty(&file)?;
    Ok(Box::new(file))
}

/// One open connection to the adapter.
pub struct Conduit {
    reader: BufReader<Box<dyn Port>>,
    writer: SharedWriter,
    client: ClientKind,
}

impl Conduit {
    /// Opens the port once; retry policy is the caller's business.
    pub fn open(device: &str, client: ClientKind) -> io::Result<Conduit> {
        Conduit::with_port(open_port(device)?, client)
    }

    /// Wraps an already open port.
    pub fn with_port(port: Box<dyn Port>, client: ClientKind) -> io::Result<Conduit> {
        let writer: SharedWriter = Arc::new(Mutex::new(port.clone_writer()?));
        Ok(Conduit {
            reader: BufReader::new(port),
            writer,
            client,
        })
    }

    #[inline]
    pub fn client(&self) -> ClientKind {
        self.client
    }

    /// A handle on the write half, for forwarding frames from the API.
    pub fn shared_writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut w = self.writer.lock();
        w.write_all(data)?;
        w.flush()
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)?;
        trace!("received {} bytes", buf.len());
        Ok(())
    }

    /// Scans the input for the hello pattern, then reads the adapter's
    /// protocol and firmware version and replies with our greeting.
    pub fn sync_on_hello(&mut self) -> io::Result<AdapterInfo> {
        let mut window = [0u8; 4];
        loop {
            let mut b = [0u8; 1];
            self.receive(&mut b)?;
            window.rotate_left(1);
            window[3] = b[0];
            if &window[..] == HELLO_PATTERN {
                break;
            }
        }
        let mut info = [0u8; 2];
        self.receive(&mut info)?;
        self.send(DAEMON_GREETING)?;
        let info = AdapterInfo {
            protocol: info[0],
            firmware: info[1],
        };
        debug!("synced with adapter: {:?}", info);
        Ok(info)
    }

    /// Reads and decodes the next four byte command frame.
    pub fn receive_command(&mut self) -> io::Result<Command> {
        let mut frame = [0u8; 4];
        self.receive(&mut frame)?;
        let cmd = Command::decode(frame)?;
        trace!("received command {:?}", cmd);
        Ok(cmd)
    }

    /// Receives a variable length section during PUT.
    ///
    /// A header sized chunk is read first; if it carries the header flag
    /// byte and checks out against its checksum it is returned as is,
    /// otherwise the read is completed to the record length of the client.
    /// The flag check matters: a record's leading bytes share the checksum
    /// layout of a header.
    pub fn receive_block(&mut self) -> io::Result<Vec<u8>> {
        let header_len = self.client.header_len();
        let record_len = self.client.record_len();

        let mut data = vec![0u8; header_len];
        self.receive(&mut data)?;

        let looks_like_header = Header::new(self.client, &data, true)
            .map(|h| {
                h.flags() == self.client.header_flag() && h.validation_error().is_none()
            })
            .unwrap_or(false);
        if looks_like_header {
            return Ok(data);
        }

        data.resize(record_len, 0);
        self.receive(&mut data[header_len..])?;
        Ok(data)
    }

    /// Writes the sync pattern into the head of `buf`, returning its
    /// length. Used for fixed length PUT, where the adapter omits the
    /// preamble to save bandwidth.
    pub fn fill_preamble(&self, buf: &mut [u8]) -> usize {
        buf[..SYNC_PATTERN.len()].copy_from_slice(&SYNC_PATTERN);
        SYNC_PATTERN.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrived_core::Record;

    // feeds canned bytes, collects writes
    struct FakePort {
        input: std::io::Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    struct FakeWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for FakeWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Port for FakePort {
        fn clone_writer(&self) -> io::Result<Box<dyn Write + Send>> {
            Ok(Box::new(FakeWriter(Arc::clone(&self.written))))
        }
    }

    fn conduit_with(input: Vec<u8>) -> (Conduit, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let port = FakePort {
            input: std::io::Cursor::new(input),
            written: Arc::clone(&written),
        };
        let conduit = Conduit::with_port(Box::new(port), ClientKind::If1).unwrap();
        (conduit, written)
    }

    #[test]
    fn syncs_on_hello_pattern() {
        let mut input = vec![0x42, 0x00, 0x17]; // noise before the pattern
        input.extend_from_slice(HELLO_PATTERN);
        input.extend_from_slice(&[7, 3]); // protocol, firmware
        let (mut conduit, written) = conduit_with(input);

        let info = conduit.sync_on_hello().unwrap();
        assert_eq!(info, AdapterInfo { protocol: 7, firmware: 3 });
        assert_eq!(&written.lock()[..], DAEMON_GREETING);
    }

    #[test]
    fn receive_block_classifies_header() {
        let hd = mdrived_core::Header::generate(ClientKind::If1, 42, "wire").unwrap();
        let (mut conduit, _) = conduit_with(hd.muxed().to_vec());
        let block = conduit.receive_block().unwrap();
        assert_eq!(block.len(), ClientKind::If1.header_len());
    }

    #[test]
    fn receive_block_classifies_record() {
        // a record's leading bytes must not be mistaken for a header
        let rec = Record::generate(ClientKind::If1).unwrap();
        let (mut conduit, _) = conduit_with(rec.muxed().to_vec());
        let block = conduit.receive_block().unwrap();
        assert_eq!(block.len(), ClientKind::If1.record_len());
        let again = Record::new(ClientKind::If1, &block, true).unwrap();
        assert!(again.validation_error().is_none());
    }

    #[test]
    fn decodes_commands() {
        let cmd = Command::decode([OP_PUT, 3, 0, 0]).unwrap();
        assert_eq!(cmd.op, Op::Put);
        assert_eq!(cmd.drive().unwrap(), 3);
        assert_eq!(cmd.arg(1), 0);
        assert!(Command::decode([0x99, 0, 0, 0]).is_err());
        assert!(Command::decode([OP_STATUS, 0, 0, 0]).unwrap().drive().is_err());
        assert!(Command::decode([OP_STATUS, 9, 0, 0]).unwrap().drive().is_err());
    }

    #[test]
    fn op_codes_match_wire_protocol() {
        for (op, code) in [
            (Op::Hello, 1u8),
            (Op::Status, 2),
            (Op::Get, 3),
            (Op::Put, 4),
            (Op::Cancel, 5),
            (Op::Map, 6),
            (Op::Config, 7),
            (Op::Debug, 8),
        ] {
            assert_eq!(Command::decode([code, 0, 0, 0]).unwrap().op, op);
        }
    }
}
