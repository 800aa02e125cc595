use clap::Parser as ClapParser;
use std::process;
use std::rc::Rc;

use kiesel::image::Image;
use kiesel::method::CompiledMethod;
use kiesel::printer;
use kiesel::value::Object;
use kiesel::{Machine, Unwind};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Kernel classes to inspect with --dump (all when empty)
    #[arg(required = false, help = "Class names for --dump")]
    classes: Vec<String>,

    /// Print decompiled kernel methods instead of executing
    #[arg(long, help = "Dump decompiled methods of the kernel classes")]
    dump: bool,

    /// Raw bytecode to run against nil
    #[arg(long, help = "Hex bytecode to execute, e.g. '70 76 B0 7C'")]
    bytes: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.dump {
        dump_classes(&cli.classes);
        return;
    }

    let (bytecode, literals) = match &cli.bytes {
        Some(text) => match parse_bytes(text) {
            Ok(bytes) => (bytes, Vec::new()),
            Err(err) => {
                eprintln!("Error parsing --bytes: {err}");
                process::exit(2);
            }
        },
        None => demo_program(),
    };

    let mut machine = Machine::new(Image::bootstrap());
    let method = Rc::new(CompiledMethod::new(
        None, 0, 0, None, bytecode, literals,
    ));
    match machine.invoke(method, Object::Nil, Vec::new()) {
        Ok(value) => println!("{value:?}"),
        Err(Unwind::Exit { status }) => process::exit(status),
        Err(Unwind::Error(error)) => {
            eprintln!("Error: {error}");
            process::exit(1);
        }
        Err(other) => {
            eprintln!("Error: control transfer escaped: {other:?}");
            process::exit(1);
        }
    }
}

/// `6 * 7` through the literal frame, the default when no bytecode is
/// given on the command line.
fn demo_program() -> (Vec<u8>, Vec<Object>) {
    (
        vec![0x20, 0x21, 0xB8, 0x7C],
        vec![Object::SmallInt(6), Object::SmallInt(7)],
    )
}

fn parse_bytes(text: &str) -> Result<Vec<u8>, String> {
    text.split([' ', ','])
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16)
                .map_err(|_| format!("'{token}' is not a hex byte"))
        })
        .collect()
}

fn dump_classes(names: &[String]) {
    let image = Image::bootstrap();
    for class in image.classes.all() {
        let class = class.borrow();
        let class_name = class.name();
        if !names.is_empty()
            && !names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&class_name))
        {
            continue;
        }
        if class.methods.is_empty() {
            continue;
        }
        println!("== {class_name} ==");
        let mut methods: Vec<_> = class.methods.iter().collect();
        methods.sort_by_key(|(selector, _)| {
            image.selectors.display(**selector)
        });
        for (_, method) in methods {
            let printed = printer::print_method(&image.selectors, method);
            println!("{}", printed.text);
        }
    }
}
