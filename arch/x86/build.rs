use x86_decode_gen::Tables;

const SOURCES: &[&str] = &[
    "tables/legacy.tbl",
    "tables/fpu.tbl",
    "tables/sse.tbl",
    "tables/vex.tbl",
    "tables/evex.tbl",
    "tables/xop.tbl",
    "tables/3dnow.tbl",
];

fn main() {
    let out_dir = match std::env::var_os("OUT_DIR") {
        Some(dir) => dir,
        None => {
            eprintln!("OUT_DIR is not set");
            std::process::exit(1);
        }
    };

    let tables = SOURCES
        .iter()
        .fold(Tables::new(out_dir), |tables, path| tables.source(path));

    if let Err(err) = tables.generate() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
