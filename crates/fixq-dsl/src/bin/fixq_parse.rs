use std::{env, fs};

use fixq_dsl::{parse_program, Decl};

fn main() {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: fixq_parse <file.fq>");
        std::process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("usage: fixq_parse <file.fq>");
        std::process::exit(2);
    }

    let text = match fs::read_to_string(&path) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("failed to read `{path}`: {err}");
            std::process::exit(2);
        }
    };

    match parse_program(&text) {
        Ok(program) => {
            let funs = program
                .decls
                .iter()
                .filter(|d| matches!(d, Decl::Fun { .. }))
                .count();
            println!(
                "ok: decls={} funs={} vals={}",
                program.decls.len(),
                funs,
                program.decls.len() - funs
            );
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
