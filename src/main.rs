use std::io::Write;
use std::path::Path;
use std::{env, fs};

use kiln::bytecode::disasm::disassemble;
use kiln::frontend::token_dumper::TokenDumper;
use kiln::lexer::Lexer;
use kiln::parser::parse_template;
use kiln::{Engine, EngineConfig, FileFetcher, Syntax, Value, Vars};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast = args.contains(&"--ast".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let no_optimize = args.contains(&"--no-optimize".to_string());

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    // first non-flag argument is the template, the rest are name=value pairs
    let mut positional = args.iter().skip(1).filter(|a| !a.starts_with('-'));
    let Some(filename) = positional.next() else {
        print_usage();
        std::process::exit(1);
    };
    let vars = parse_vars(positional);

    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    let syntax = Syntax::tterse();
    if tokens_only {
        dump_tokens(filename, &source, &syntax, no_color, pretty);
    } else if ast {
        match parse_template(filename, &source, &syntax) {
            Ok(template) => println!("{:#?}", template),
            Err(e) => fail(e),
        }
    } else {
        let engine = engine_for(filename, !no_optimize);
        match engine.compile(filename, &source) {
            Ok(bc) if bytecode => print!("{}", disassemble(&bc)),
            Ok(bc) => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                if let Err(e) = engine.execute(&bc, &vars, &mut out) {
                    let _ = out.flush();
                    fail(e);
                }
                let _ = out.flush();
            }
            Err(e) => fail(e),
        }
    }
}

fn engine_for(filename: &str, optimize: bool) -> Engine {
    let dir = Path::new(filename)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Engine::with_config(EngineConfig {
        optimize,
        ..EngineConfig::default()
    })
    .with_fetcher(FileFetcher::new([dir]))
}

fn parse_vars<'a>(args: impl Iterator<Item = &'a String>) -> Vars {
    let mut vars = Vars::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => {
                vars.insert(name.to_string(), Value::from(value));
            }
            None => eprintln!("ignoring '{}': expected name=value", arg),
        }
    }
    vars
}

fn dump_tokens(name: &str, source: &str, syntax: &Syntax, no_color: bool, pretty: bool) {
    match Lexer::new(name, source, syntax).tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();

            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(&tokens);
        }
        Err(e) => fail(e),
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("{}", e);
    std::process::exit(1);
}

fn print_usage() {
    println!("KILN - TTerse template engine");
    println!();
    println!("Usage:");
    println!("  kiln <file> [name=value ...]   Render a template");
    println!("  kiln --tokens <file>           Show tokens only (--pretty, --no-color)");
    println!("  kiln --ast <file>              Show the parsed template");
    println!("  kiln --bc <file>               Show the compiled bytecode");
    println!("  kiln --no-optimize ...         Skip the peephole optimizer");
    println!("  kiln --help, -h                Show this help");
}
