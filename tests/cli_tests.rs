use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::str;
use tempfile::TempDir;

/// CLI interface tests
#[cfg(test)]
mod cli_tests {
    use super::*;

    fn uart2uart(args: &[&str], cwd: &Path) -> Output {
        Command::new(env!("CARGO_BIN_EXE_uart2uart"))
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("Failed to execute command")
    }

    fn write_config(dir: &Path, content: &str) -> String {
        let path = dir.join("config.toml");
        fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_cli_help() {
        let dir = TempDir::new().unwrap();
        let output = uart2uart(&["--help"], dir.path());
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");

        assert!(output.status.success());
        assert!(stdout.contains("Usage:"));
        assert!(stdout.contains("Commands:"));
        for command in ["ports", "monitor", "flash", "config", "version"] {
            assert!(stdout.contains(command), "help is missing '{}'", command);
        }
    }

    #[test]
    fn test_cli_version() {
        let dir = TempDir::new().unwrap();
        let output = uart2uart(&["-q", "version"], dir.path());
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");

        assert!(output.status.success());
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_cli_flash_help() {
        let dir = TempDir::new().unwrap();
        let output = uart2uart(&["flash", "esp32", "--help"], dir.path());
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");

        assert!(stdout.contains("--port"));
        assert!(stdout.contains("--baud"));
        assert!(stdout.contains("--offset"));
    }

    #[test]
    fn test_cli_invalid_command() {
        let dir = TempDir::new().unwrap();
        let output = uart2uart(&["invalid-command"], dir.path());
        assert!(!output.status.success());
    }

    #[test]
    fn test_cli_monitor_requires_port() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        let output = uart2uart(&["-q", "--config", &config, "monitor"], dir.path());
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("Error:"));
        assert!(stderr.contains("no port given"));
    }

    #[test]
    fn test_cli_config_show_json() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "[serial]\ndefault_baud_rate = 115200\n");
        let output = uart2uart(&["-q", "--output", "json", "--config", &config, "config", "show"], dir.path());

        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
        assert_eq!(value["serial"]["default_baud_rate"], 115200);
        assert_eq!(value["flash"]["esp32"]["baud_rate"], 460800);
    }

    #[test]
    fn test_cli_config_init() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().to_string_lossy().into_owned();
        let output = uart2uart(&["-q", "config", "init", "--dir", &target], dir.path());

        assert!(output.status.success());
        let created = dir.path().join(".uart2uart").join("config.toml");
        assert!(created.exists());

        // A second init refuses to overwrite
        let output = uart2uart(&["-q", "config", "init", "--dir", &target], dir.path());
        assert!(!output.status.success());
    }

    #[test]
    fn test_cli_flash_missing_tool() {
        let dir = TempDir::new().unwrap();
        let tools = dir.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        let config = write_config(
            dir.path(),
            &format!(
                "[flash.tools]\nlayout = \"development\"\ntools_dir = {:?}\n",
                tools.to_string_lossy()
            ),
        );

        let output = uart2uart(
            &["-q", "--config", &config, "flash", "esp32", "app.bin", "--port", "/dev/ttyUSB0"],
            dir.path(),
        );
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("ESP32 flashing tool not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_flash_esp32_success() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("esptool.py");
        fs::write(&script, "echo 'Writing at 0x00010000... (45 %)'\necho 'Wrote 64 bytes'\n").unwrap();
        let firmware = dir.path().join("app.bin");
        fs::write(&firmware, [0u8; 64]).unwrap();

        let config = write_config(
            dir.path(),
            &format!(
                "[flash.tools]\nesptool = {:?}\n\n[flash.esp32]\ninterpreter = \"sh\"\n",
                script.to_string_lossy()
            ),
        );

        let output = uart2uart(
            &[
                "-q",
                "--output",
                "json",
                "--config",
                &config,
                "flash",
                "esp32",
                &firmware.to_string_lossy(),
                "--port",
                "/dev/ttyUSB0",
            ],
            dir.path(),
        );

        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
        assert_eq!(value["outcome"], "Succeeded");
        assert_eq!(value["target"], "esp32");
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_flash_failure_exit_code() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("esptool.py");
        fs::write(&script, "echo 'A fatal error occurred: Timed out' >&2\nexit 2\n").unwrap();
        let firmware = dir.path().join("app.bin");
        fs::write(&firmware, [0u8; 64]).unwrap();

        let config = write_config(
            dir.path(),
            &format!(
                "[flash.tools]\nesptool = {:?}\n\n[flash.esp32]\ninterpreter = \"sh\"\n",
                script.to_string_lossy()
            ),
        );

        let output = uart2uart(
            &[
                "-q",
                "--config",
                &config,
                "flash",
                "esp32",
                &firmware.to_string_lossy(),
                "--port",
                "/dev/ttyUSB0",
            ],
            dir.path(),
        );
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("Timed out"));
    }

    #[test]
    fn test_cli_output_formats() {
        let dir = TempDir::new().unwrap();
        for format in ["text", "json", "table"] {
            let output = uart2uart(&["-q", "--output", format, "version"], dir.path());
            assert!(output.status.success(), "format {} rejected", format);
        }
        let output = uart2uart(&["--output", "csv", "version"], dir.path());
        assert!(!output.status.success());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let dir = TempDir::new().unwrap();
        let output = uart2uart(&["-v", "--help"], dir.path());
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
        assert!(!stderr.contains("unexpected argument"));
    }
}
