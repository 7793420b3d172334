use anyhow::{bail, Result};
use std::path::Path;

fn usage() -> &'static str {
    "Usage:\n  archimage <image-path> <config-path>\n\n\
     <image-path>   regular file (created/replaced) or block device (wiped)\n\
     <config-path>  TOML build config\n\n\
     Environment:\n  \
     NO_CLEANUP=1   leave loop devices and mounts attached on exit\n  \
     INSPECT=1      open a shell inside the image after setup"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [image, config] => archimage::run_build(Path::new(image), Path::new(config)),
        _ => bail!(usage()),
    }
}
