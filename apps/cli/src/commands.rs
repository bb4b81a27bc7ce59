//! Subcommand handlers.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use d64_core::protocol::FirmwareVersion;
use d64_core::transport::ftdi;
use d64_core::{
    CancelToken, Cic, Config, Confirm, DeviceSession, Direction, Error, Event, FtdiTransport,
    Observer, RomDatabase, RomDbFile, Rpk, SaveType, TracingObserver, TransferRequest,
    UpgradeOutcome, UpgradePrompt, UploadOptions,
};
use tracing::debug;

use crate::cli::{DownloadArgs, FirmwareCommands, UploadArgs, parse_switch};

/// Shared state of one invocation.
pub struct App {
    pub config: Config,
    pub cancel: CancelToken,
    pub quiet: bool,
    pub verbose: bool,
}

impl App {
    fn say(&self, msg: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", msg.as_ref());
        }
    }

    fn detail(&self, msg: impl AsRef<str>) {
        if self.verbose {
            self.say(msg);
        }
    }

    fn open(&self) -> Result<DeviceSession<FtdiTransport>> {
        let observer = Arc::new(ConsoleObserver {
            quiet: self.quiet,
            verbose: self.verbose,
        });
        let dev = DeviceSession::open_configured(&self.config, observer)?;
        self.detail(format!("64drive serial: {}", dev.serial()));
        Ok(dev)
    }
}

/// Prints transfer and upgrade progress on stdout.
struct ConsoleObserver {
    quiet: bool,
    verbose: bool,
}

impl Observer for ConsoleObserver {
    fn on_event(&self, event: &Event) {
        if self.verbose {
            TracingObserver.on_event(event);
        }
        if self.quiet {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = match event {
            Event::TransferProgress {
                direction,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (current * 100 / total).min(100)
                } else {
                    100
                };
                let verb = match direction {
                    Direction::Upload => "Uploading",
                    Direction::Download => "Downloading",
                };
                write!(out, "\r{} {:>3}% ({} / {} bytes)", verb, pct, current, total)
                    .and_then(|_| out.flush())
            }
            Event::TransferFinished { .. } => writeln!(out),
            Event::UpgradeStep {
                status,
                step,
                total,
            } => write!(out, "\rUpgrading [{}/{}] {:<40}", step, total - 1, status)
                .and_then(|_| out.flush()),
            _ => Ok(()),
        };
    }
}

/// Asks on stdin; anything but "y" declines.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &UpgradePrompt) -> bool {
        println!("Ready to upgrade 64drive (serial {})", prompt.serial);
        println!("Current firmware: {}", prompt.current);
        println!(
            "New firmware {} ({}) - {}",
            prompt.new_version, prompt.date, prompt.note
        );
        print!("Do you want to proceed (Y/N):");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => line.trim().eq_ignore_ascii_case("y"),
            Err(_) => false,
        }
    }
}

pub fn list(app: &App) -> Result<()> {
    let found = ftdi::enumerate()?;
    if found.devices.is_empty() {
        if found.unknown {
            return Err(Error::UnknownDevice.into());
        }
        return Err(Error::NoDevices.into());
    }

    app.say(format!("Found {} 64drive device(s):", found.devices.len()));
    for (i, d) in found.devices.iter().enumerate() {
        app.say(format!(
            " * {}: {} {} (serial: {})",
            i, d.manufacturer, d.description, d.serial
        ));
        if app.verbose {
            let mut dev = DeviceSession::open(d, &app.config)?;
            let v = dev.version()?;
            app.say(format!(
                "   -> Hardware: {}, Firmware: {}",
                v.variant, v.firmware
            ));
            dev.close()?;
        }
    }
    Ok(())
}

pub fn upload(app: &App, args: &UploadArgs) -> Result<()> {
    let mut file = File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let file_len = file.metadata()?.len();
    let mut header = [0u8; 4];
    let n = read_prefix(&mut file, &mut header)?;
    file.seek(SeekFrom::Start(0))?;

    let opts = UploadOptions {
        bank: Some(args.bank),
        offset: args.offset,
        size: args.size,
        swap: args.byteswap.0,
        auto_cic: args.autocic,
        auto_save: args.autosave,
        extended: args.extended,
    };
    let plan = opts.plan(file_len, &header[..n])?;

    let db = match &app.config.rom_db {
        Some(path) if plan.auto_save => Some(
            RomDbFile::load_from_file(path)
                .with_context(|| format!("Failed to load ROM database {}", path.display()))?,
        ),
        _ => None,
    };

    let mut dev = app.open()?;
    app.detail(format!("upload bank: {}", plan.request.bank));
    app.detail(format!("byteswap: {}", plan.request.swap));
    app.detail(format!("size: {}", plan.request.size));
    app.detail(format!("offset: {}", plan.request.offset));

    let report = dev.upload_rom(
        &plan,
        BufReader::new(file),
        db.as_ref().map(|db| db as &dyn RomDatabase),
        app.config.pipe_depth,
        &app.cancel,
    )?;

    if let Some(game) = &report.game {
        app.detail(format!("Detected game: {}", game));
    }
    if report.extended {
        app.detail("Extended mode enabled");
    }
    if let Some(cic) = report.cic {
        app.detail(format!("Autoset CIC type: {}", cic));
    }
    if let Some(st) = report.save_type {
        app.detail(format!("Autoset save type: {}", st));
    }
    Ok(())
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

pub fn download(app: &App, args: &DownloadArgs) -> Result<()> {
    let mut dev = app.open()?;
    app.detail(format!("download bank: {}", args.bank));
    app.detail(format!("byteswap: {}", args.byteswap));

    let file = File::create(&args.file)
        .with_context(|| format!("Failed to create {}", args.file.display()))?;
    app.detail(format!("size: {}", args.size));
    app.detail(format!("offset: {}", args.offset));

    let req = TransferRequest::new(args.bank, args.offset, args.size).with_swap(args.byteswap);
    dev.download(&req, BufWriter::new(file), &app.cancel)?;
    Ok(())
}

pub fn cic(app: &App, name: &str) -> Result<()> {
    let explicit = if name == "auto" {
        None
    } else {
        Some(name.parse::<Cic>().map_err(anyhow::Error::msg)?)
    };

    let mut dev = app.open()?;
    let cic = match explicit {
        Some(cic) => cic,
        None => dev.autodetect_cic()?,
    };
    app.detail(format!("CIC type: {}", cic));
    dev.set_cic(cic)?;
    Ok(())
}

pub fn savetype(app: &App, name: &str) -> Result<()> {
    let save_type: SaveType = name.parse().map_err(anyhow::Error::msg)?;
    let mut dev = app.open()?;
    app.detail(format!("Save type: {}", save_type));
    dev.set_save_type(save_type)?;
    Ok(())
}

pub fn extended(app: &App, value: &str) -> Result<()> {
    let enable = parse_switch(value);
    let mut dev = app.open()?;
    app.detail(format!("Extended mode: {}", enable));
    dev.set_extended(enable)?;
    Ok(())
}

fn load_rpk(path: &Path) -> Result<Rpk> {
    Rpk::open(path).with_context(|| format!("Failed to load {}", path.display()))
}

pub fn firmware(app: &App, cmd: &FirmwareCommands) -> Result<()> {
    match cmd {
        FirmwareCommands::Info { file } => {
            let rpk = load_rpk(file)?;
            if !app.quiet {
                rpk.metadata.write_table(io::stdout().lock())?;
            }
            Ok(())
        }
        FirmwareCommands::Extract { file, output } => {
            let rpk = load_rpk(file)?;
            let out = match output {
                Some(path) => path.clone(),
                None if rpk.metadata.file.is_empty() => bail!("archive names no output file, use -o"),
                None => rpk.metadata.file.clone().into(),
            };
            let n = rpk.extract_to(&out)?;
            app.say(format!("Written {:?} ({} bytes)", out.display().to_string(), n));
            Ok(())
        }
        FirmwareCommands::Upgrade { file } => {
            let rpk = load_rpk(file)?;
            let mut dev = app.open()?;
            match dev.upgrade_firmware(
                &rpk,
                &mut StdinConfirm,
                app.config.poll_interval(),
                &app.cancel,
            )? {
                UpgradeOutcome::Upgraded => {
                    app.say("\nFirmware upgraded correctly -- power-cycle your 64drive unit")
                }
                UpgradeOutcome::Declined => debug!("Upgrade declined by user"),
            }
            Ok(())
        }
    }
}

pub fn debug(app: &App) -> Result<()> {
    let mut dev = app.open()?;
    let v = dev.version()?;
    if v.firmware < FirmwareVersion::DEBUG_FIFO {
        bail!(
            "\"d64 debug\" requires 64drive firmware >= {}, found: {}\n\
             Download a newer firmware and run \"d64 firmware upgrade\"",
            FirmwareVersion::DEBUG_FIFO,
            v.firmware
        );
    }

    let mut out = io::stdout();
    loop {
        match dev.fifo_read(&app.cancel) {
            Ok(packet) => {
                if let Some(text) = packet.text() {
                    out.write_all(text)?;
                    out.flush()?;
                }
            }
            Err(Error::Cancelled) => return Ok(()),
            // joined mid-stream
            Err(Error::InvalidFifoHeader(_)) => {}
            Err(e @ Error::Transport(_)) => return Err(e.into()),
            Err(e) => eprintln!("{}", e),
        }
    }
}
