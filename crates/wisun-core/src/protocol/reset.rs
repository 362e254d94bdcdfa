//! Hardware reset line
//!
//! The module's reset pin is wired to a GPIO output that idles inactive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Digital output driving the module's reset pin
pub trait ResetLine: Send {
    /// Drive the line active (`true`) or inactive (`false`)
    fn set_active(&mut self, active: bool) -> io::Result<()>;

    /// Return the line to inactive and give it back to the system
    fn release(&mut self) -> io::Result<()>;
}

/// Reset line for setups without a wired reset pin
#[derive(Debug, Default)]
pub struct NoReset;

impl ResetLine for NoReset {
    fn set_active(&mut self, _active: bool) -> io::Result<()> {
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Labels of the gpiochips whose lines are numbered like the BCM pins
const SOC_CHIP_LABELS: [&str; 2] = ["pinctrl-bcm", "pinctrl-rp1"];

/// GPIO pin driven through the Linux sysfs interface
///
/// Pins are given as BCM numbers. Sysfs numbers lines globally, and newer
/// Raspberry Pi kernels place the SoC chip at a non-zero base (512 from 6.6),
/// so the pin is offset by the base of the SoC gpiochip when one is found.
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    /// Global sysfs line number of `pin`
    line: u32,
    root: PathBuf,
    exported: bool,
}

impl SysfsGpio {
    /// Export BCM `pin` and configure it as an output at low level
    pub fn open(pin: u32) -> io::Result<Self> {
        Self::open_at(PathBuf::from("/sys/class/gpio"), pin)
    }

    fn open_at(root: PathBuf, pin: u32) -> io::Result<Self> {
        let line = soc_chip_base(&root, pin).map_or(pin, |base| base + pin);
        let line_dir = root.join(format!("gpio{}", line));
        let exported = !line_dir.exists();
        if exported {
            fs::write(root.join("export"), line.to_string())?;
            // udev needs a moment to fix permissions on the new node
            thread::sleep(Duration::from_millis(100));
        }
        fs::write(line_dir.join("direction"), "low")?;
        debug!(pin, line, "GPIO reset line configured");
        Ok(Self {
            pin,
            line,
            root,
            exported,
        })
    }

    /// BCM pin number
    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.line)).join("value")
    }
}

/// Base of the SoC gpiochip under `root`, if it has a line for `pin`
fn soc_chip_base(root: &Path, pin: u32) -> Option<u32> {
    let read = |dir: &Path, name: &str| fs::read_to_string(dir.join(name)).ok();
    fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("gpiochip"))
        .find_map(|entry| {
            let dir = entry.path();
            let label = read(&dir, "label")?;
            if !SOC_CHIP_LABELS.iter().any(|soc| label.trim().starts_with(soc)) {
                return None;
            }
            let ngpio: u32 = read(&dir, "ngpio")?.trim().parse().ok()?;
            let base: u32 = read(&dir, "base")?.trim().parse().ok()?;
            (pin < ngpio).then_some(base)
        })
}

impl ResetLine for SysfsGpio {
    fn set_active(&mut self, active: bool) -> io::Result<()> {
        fs::write(self.value_path(), if active { "1" } else { "0" })
    }

    fn release(&mut self) -> io::Result<()> {
        self.set_active(false)?;
        if self.exported {
            fs::write(self.root.join("unexport"), self.line.to_string())?;
            self.exported = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_gpio_existing_pin() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio18");
        fs::create_dir_all(&pin_dir).unwrap();

        let mut gpio = SysfsGpio::open_at(root.path().to_path_buf(), 18).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "low");

        gpio.set_active(true).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("value")).unwrap(), "1");

        // Pin was exported by someone else, so release leaves it exported
        gpio.release().unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("value")).unwrap(), "0");
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn test_sysfs_gpio_offsets_by_soc_chip_base() {
        let root = tempfile::tempdir().unwrap();
        let chip = root.path().join("gpiochip512");
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("label"), "pinctrl-bcm2711\n").unwrap();
        fs::write(chip.join("ngpio"), "58\n").unwrap();
        fs::write(chip.join("base"), "512\n").unwrap();
        let expander = root.path().join("gpiochip570");
        fs::create_dir_all(&expander).unwrap();
        fs::write(expander.join("label"), "raspberrypi-exp-gpio\n").unwrap();
        let line_dir = root.path().join("gpio530");
        fs::create_dir_all(&line_dir).unwrap();

        let mut gpio = SysfsGpio::open_at(root.path().to_path_buf(), 18).unwrap();
        assert_eq!(gpio.pin(), 18);
        assert_eq!(fs::read_to_string(line_dir.join("direction")).unwrap(), "low");
        gpio.set_active(true).unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("value")).unwrap(), "1");
        assert!(!root.path().join("gpio18").exists());
    }
}
