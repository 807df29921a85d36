#![recursion_limit = "128"]

#[macro_use]
extern crate combine;
#[macro_use]
extern crate log;
extern crate clap;

mod asm;
mod codegen;
mod error;
mod heap;
mod isa;
mod lower;
mod params;
mod parser;
mod regalloc;
mod syntax;
mod tc;
mod tf18;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use error::*;
use params::Config;
use std::fs::File;
use std::io::prelude::*;
use std::io;
use std::process;

/// Source text to mnemonic text.
fn compile(code: &str, config: &Config) -> Result<String, Error> {
    config.validate()?;
    let stmts = parser::parse(code)?;
    let stmts = tc::tc(stmts)?;
    lower::compile(&stmts, config)
}

fn read_input(args: &ArgMatches) -> Result<String, Error> {
    let mut buf = String::new();
    match args.value_of("INPUT") {
        Some(path) => {
            File::open(path)?.read_to_string(&mut buf)?;
        }
        None => {
            io::stdin().read_to_string(&mut buf)?;
        }
    }
    Ok(buf)
}

fn parse_num(args: &ArgMatches, name: &str) -> Result<usize, Error> {
    let s = args.value_of(name).unwrap_or_default();
    s.parse::<usize>()
        .map_err(|_| Error::Usage(format!("--{} expects a number, got '{}'", name, s)))
}

/// Renders mnemonic text in the requested output format. Nothing is
/// written until the whole program has assembled.
fn render(text: &str, format: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match format {
        "asm" => out.extend_from_slice(text.as_bytes()),
        "bin" => asm::write_bin(&mut out, &asm::assemble(text)?)?,
        "hex" => asm::write_hex(&mut out, &asm::assemble(text)?)?,
        f => return Err(Error::Usage(format!("unknown output format '{}'", f))),
    }
    Ok(out)
}

fn write_output(args: &ArgMatches, bytes: &[u8]) -> Result<(), Error> {
    match args.value_of("output") {
        Some(path) => File::create(path)?.write_all(bytes)?,
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(bytes)?;
            lock.flush()?;
        }
    }
    Ok(())
}

fn input_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("INPUT")
        .value_name("FILENAME")
        .help("Sets the input file to use (defaults to stdin)")
        .index(1)
}

fn output_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("output")
        .short("o")
        .long("output")
        .value_name("OUT")
        .help("Writes to OUT instead of stdout")
        .takes_value(true)
}

fn cli<'a, 'b>() -> App<'a, 'b> {
    App::new("simtc")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("asm")
                .about("Assembles mnemonic text into instruction words")
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .possible_values(&["bin", "hex"])
                        .default_value("bin")
                        .help("Output format"),
                )
                .arg(output_arg())
                .arg(input_arg()),
        )
        .subcommand(
            SubCommand::with_name("compile")
                .about("Compiles an expression program")
                .arg(
                    Arg::with_name("single-out")
                        .short("s")
                        .long("single-out")
                        .help("Omits the frame-buffer clear and screen refresh units"),
                )
                .arg(
                    Arg::with_name("memory")
                        .short("m")
                        .long("memory")
                        .value_name("MEM_WORDS")
                        .default_value("262144")
                        .help("Sets the data memory available to arrays, in words")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("registers")
                        .short("r")
                        .long("num-registers")
                        .value_name("NUM_REGS")
                        .default_value("8")
                        .help("Sets the number of general-purpose registers"),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .possible_values(&["asm", "bin", "hex"])
                        .default_value("asm")
                        .help("Output format"),
                )
                .arg(output_arg())
                .arg(input_arg()),
        )
}

fn main_result() -> Result<i32, Error> {
    let args = cli().get_matches();
    match args.subcommand() {
        ("asm", Some(sub)) => {
            let text = read_input(sub)?;
            let bytes = render(&text, sub.value_of("format").unwrap_or("bin"))?;
            write_output(sub, &bytes)?;
        }
        ("compile", Some(sub)) => {
            let config = Config {
                mem_size: parse_num(sub, "memory")?,
                num_registers: parse_num(sub, "registers")?,
                single_out: sub.is_present("single-out"),
            };
            let text = compile(&read_input(sub)?, &config)?;
            let bytes = render(&text, sub.value_of("format").unwrap_or("asm"))?;
            write_output(sub, &bytes)?;
        }
        _ => return Err(Error::Usage("expected a subcommand".to_string())),
    }
    Ok(0)
}

fn main() {
    env_logger::init();
    match main_result() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {}", err);
            process::exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_default(code: &str) -> String {
        compile(code, &Config::default()).unwrap()
    }

    #[test]
    fn test_assemble_two_words() {
        let bytes = render("addi r4, zero, 3\nexit\n", "hex").unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "20018004\ne0001c00\n");
        let bin = render("exit", "bin").unwrap();
        assert_eq!(bin, vec![0x00, 0x1c, 0x00, 0xe0]);
    }

    #[test]
    fn test_asm_writes_binary_by_default() {
        let args = cli().get_matches_from(vec!["simtc", "asm", "prog.s"]);
        let sub = args.subcommand_matches("asm").unwrap();
        assert_eq!(sub.value_of("format"), Some("bin"));
        let args = cli().get_matches_from(vec!["simtc", "compile"]);
        let sub = args.subcommand_matches("compile").unwrap();
        assert_eq!(sub.value_of("format"), Some("asm"));
    }

    #[test]
    fn test_assembler_reports_line() {
        match render("addi r4, zero, 3\nfrob r1\n", "hex") {
            Err(Error::AtLine { line: 2, .. }) => (),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_compile_output_is_well_formed() {
        let code = r#"
            $a = |2, 2| [1, 2, 3, 4]
            $b = relu($a dot $a.T - 10)
            .plot $b 0 30
            .plotxy 0.3 0.2 0.1 sin(x) * cos(y)
            .simple_plotxy -2 2 x^2 - y
        "#;
        let text = compile_default(code);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with('<'));
        assert_eq!(lines.last(), Some(&"exit"));
        let headers = lines.iter().filter(|l| l.starts_with('<')).count();
        let exits = lines.iter().filter(|&&l| l == "exit").count();
        assert_eq!(headers, exits);
        let words = asm::assemble(&text).unwrap();
        assert!(words.len() > lines.len() / 2);
    }

    #[test]
    fn test_compile_hex_round_trips_through_assembler() {
        let text = compile_default("$v = |3| [1, 2, 3]\n$w = -$v * 2");
        let hex = String::from_utf8(render(&text, "hex").unwrap()).unwrap();
        assert_eq!(hex.lines().count(), asm::assemble(&text).unwrap().len());
        assert!(hex.lines().all(|l| l.len() == 8));
    }

    #[test]
    fn test_compile_errors() {
        assert!(compile("$a = ", &Config::default()).is_err());
        assert!(compile("$a = $b", &Config::default()).is_err());
        let tiny = Config {
            mem_size: 64,
            ..Config::default()
        };
        match compile("$a = |2| [1, 2]", &tiny) {
            Err(Error::OutOfMemory { requested: 128, .. }) => (),
            other => panic!("{:?}", other),
        }
        let bad = Config {
            num_registers: 0,
            ..Config::default()
        };
        assert!(compile(".plotx x", &bad).is_err());
    }
}
