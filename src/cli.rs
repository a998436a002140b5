use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub configs: Vec<PathBuf>,
    pub outdir: PathBuf,
    pub resume: bool,
    pub force: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        CliOptions {
            configs: vec![],
            outdir: PathBuf::from("."),
            resume: false,
            force: false,
        }
    }
}

fn usage() {
    eprintln!(
        "usage: dumbarb [options] <config> [<config> ...]\n\
         \n\
         options:\n\
           -o, --outdir DIR   directory to hold match directories (default .)\n\
           -c, --continue     resume partially played matches\n\
           -f, --force        wipe existing match directories and start over\n\
           -v, --version      display version information and exit\n\
           -h, --help         display this message"
    );
}

pub fn parse() -> Option<CliOptions> {
    parse_from(std::env::args().skip(1).collect())
}

fn parse_from(args: Vec<String>) -> Option<CliOptions> {
    let mut options = CliOptions::default();

    let mut it = args.into_iter();
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "-v" | "--version" => {
                println!("dumbarb {}", env!("CARGO_PKG_VERSION"));
                return None;
            }

            "-h" | "--help" => {
                usage();
                return None;
            }

            "-o" | "--outdir" => {
                let Some(value) = it.next() else {
                    eprintln!("{flag} requires a directory argument");
                    return None;
                };
                options.outdir = PathBuf::from(value);
            }

            "-c" | "--continue" => {
                options.resume = true;
            }

            "-f" | "--force" => {
                options.force = true;
            }

            other if other.starts_with('-') => {
                eprintln!("unknown option {other}");
                usage();
                return None;
            }

            config => {
                options.configs.push(PathBuf::from(config));
            }
        }
    }

    if options.configs.is_empty() {
        usage();
        return None;
    }
    if options.resume && options.force {
        eprintln!("--continue and --force contradict each other");
        return None;
    }

    Some(options)
}
