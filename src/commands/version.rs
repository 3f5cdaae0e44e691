use ark::settings::BuildInfo;

pub fn run() {
    print!("{}", format_version(&BuildInfo::current()));
}

fn format_version(build: &BuildInfo) -> String {
    format!(
        "Ark version {}\nCommit:     {}\nBuilt:      {}\nPlatform:   {}/{}\n",
        build.version,
        build.commit,
        build.build_date,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
