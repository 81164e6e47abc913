//! Built-in recipe catalog.
//!
//! Each function returns the local [`Layer`] of one variant; the chain
//! wiring lives in [`builtin_variants`]. The shell text here is recipe data
//! and can change without touching composition or rendering.

use descriptor::RepoContext;
use std::collections::BTreeSet;

use crate::error::ComposeError;
use crate::layer::{FileManifest, Layer};
use crate::packages::{apt_assemble_instruction, list_entries, validate_setting};
use crate::privilege::Instruction;
use crate::snapshot::finalize_r_snapshot;
use crate::variant::{Detection, Variant};

pub const HEALTHCHECK_DEST: &str = "/healthcheck.py";

const REPROZIP_URL: &str = "https://github.com/cirss/reprozip-static/releases/download/v1.0.16-r1/reprozip-1.016-linux-x86-64-static";
const RSTUDIO_URL: &str = "http://use.yt/upload/e66cd310";
const RSTUDIO_MD5: &str = "e9764a5246bccc5ff9e39b62aea148ff";

const DEFAULT_MATLAB_VERSION: &str = "R2020a";
const DEFAULT_MATLAB_PROXY_VERSION: &str = "v0.3.2";
const DEFAULT_STATA_VERSION: &str = "16";
const DEFAULT_JULIA_VERSION: &str = "1.6.7";
const OPENREFINE_VERSION: &str = "2.8";

/// Every built-in variant, most specific first, followed by the default.
pub fn builtin_variants() -> (Vec<Variant>, Variant) {
    let base = Variant::root("base", base_layer);
    let wholetale = Variant::derive(&base, "wholetale", wholetale_layer);
    let jupyter = Variant::derive(&wholetale, "jupyter", jupyter_layer)
        .detected_by(Detection::Buildpack("PythonBuildPack".into()));
    let r = Variant::derive(&jupyter, "r", r_layer).with_finalize(finalize_r_snapshot);

    let registered = vec![
        Variant::derive(&base, "spark", spark_layer)
            .detected_by(Detection::Buildpack("SparkBuildPack".into())),
        Variant::derive(&jupyter, "julia", julia_layer)
            .detected_by(Detection::Buildpack("JuliaProjectBuildPack".into())),
        Variant::derive(&jupyter, "matlab", matlab_layer)
            .detected_by(Detection::Buildpack("MatlabBuildPack".into())),
        Variant::derive(&jupyter, "stata", stata_layer)
            .detected_by(Detection::Buildpack("StataBuildPack".into())),
        Variant::derive(&r, "r-jupyter", r_jupyter_layer)
            .detected_by(Detection::Buildpack("RBuildPack".into())),
        jupyter,
        Variant::root("openrefine", openrefine_layer)
            .detected_by(Detection::Template("openrefine.tpl".into())),
        Variant::derive(&wholetale, "rocker", rocker_layer)
            .detected_by(Detection::Template("rocker-geospatial.tpl".into())),
    ];

    (registered, base)
}

fn package_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn pair(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

fn io_error(ctx: &RepoContext, name: &str) -> impl FnOnce(std::io::Error) -> ComposeError {
    let path = ctx.host_path(name);
    move |source| ComposeError::Io { path, source }
}

fn base_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        base_image: Some("buildpack-deps:bionic".to_string()),
        base_packages: package_set(&["less", "locales", "unzip"]),
        build_env: vec![pair("DEBIAN_FRONTEND", "noninteractive")],
        build_scripts: vec![
            Instruction::root(
                r#"
                echo "en_US.UTF-8 UTF-8" > /etc/locale.gen && \
                locale-gen
                "#,
            ),
            Instruction::root(
                r#"
                id -u ${NB_USER} >/dev/null 2>&1 || ( \
                groupadd --gid ${NB_UID} ${NB_USER} && \
                useradd --comment "Default user" --create-home --gid ${NB_UID} \
                    --no-log-init --shell /bin/bash --uid ${NB_UID} ${NB_USER} )
                "#,
            ),
        ],
        env: vec![
            pair("LC_ALL", "en_US.UTF-8"),
            pair("LANG", "en_US.UTF-8"),
            pair("LANGUAGE", "en_US.UTF-8"),
            pair("SHELL", "/bin/bash"),
        ],
        assemble_scripts: apt_assemble_instruction(ctx)?.into_iter().collect(),
        ..Default::default()
    })
}

fn wholetale_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        files: FileManifest::new().with(ctx.support_file("base/healthcheck.py"), HEALTHCHECK_DEST),
        build_scripts: vec![Instruction::root(format!(
            r#"
            wget -q -O /usr/local/bin/reprozip {REPROZIP_URL} && \
            chmod a+x /usr/local/bin/reprozip && \
            reprozip usage_report --disable
            "#
        ))],
        ..Default::default()
    })
}

fn jupyter_files(ctx: &RepoContext) -> FileManifest {
    FileManifest::new()
        .with(ctx.support_file("base/healthcheck.py"), HEALTHCHECK_DEST)
        .with(
            ctx.support_file("iframes/custom.js"),
            "/home/jovyan/.jupyter/custom/custom.js",
        )
        .with(
            ctx.support_file("iframes/jupyter_notebook_config.py"),
            "/home/jovyan/.jupyter/jupyter_notebook_config.py",
        )
}

fn pip_requirements(ctx: &RepoContext, pip: &str) -> Option<Instruction> {
    ctx.has_file("requirements.txt").then(|| {
        Instruction::build_user(format!(
            r#"{pip} install --no-cache-dir -r "{}""#,
            ctx.binder_path("requirements.txt")
        ))
    })
}

fn jupyter_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        base_packages: package_set(&["python3", "python3-dev", "python3-venv"]),
        build_env: vec![pair("NB_PYTHON_PREFIX", "/srv/venv")],
        path: vec!["${NB_PYTHON_PREFIX}/bin".to_string()],
        files: jupyter_files(ctx),
        build_scripts: vec![
            Instruction::root(
                r#"
                python3 -m venv ${NB_PYTHON_PREFIX} && \
                chown -R ${NB_USER}:${NB_USER} ${NB_PYTHON_PREFIX}
                "#,
            ),
            Instruction::build_user(
                r#"
                ${NB_PYTHON_PREFIX}/bin/pip install --no-cache-dir --upgrade pip && \
                ${NB_PYTHON_PREFIX}/bin/pip install --no-cache-dir notebook jupyterlab
                "#,
            ),
        ],
        assemble_scripts: pip_requirements(ctx, "${NB_PYTHON_PREFIX}/bin/pip")
            .into_iter()
            .collect(),
        ..Default::default()
    })
}

fn julia_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    let version = validate_setting(
        "JULIA_VERSION",
        ctx.env_or("JULIA_VERSION", DEFAULT_JULIA_VERSION),
    )?;
    let minor = version.rsplit_once('.').map_or(version, |(head, _)| head);

    let mut assemble_scripts = Vec::new();
    if ctx.has_file("Project.toml") {
        let project = ctx.binder_path("Project.toml");
        assemble_scripts.push(Instruction::build_user(format!(
            r#"JULIA_PROJECT="${{REPO_DIR}}/{project}" julia -e 'using Pkg; Pkg.instantiate(); Pkg.precompile()'"#
        )));
    }

    Ok(Layer {
        build_env: vec![
            pair("JULIA_PATH", "/srv/julia"),
            pair("JULIA_DEPOT_PATH", "/srv/julia/pkg"),
            pair("JULIA_VERSION", version),
        ],
        path: vec!["${JULIA_PATH}/bin".to_string()],
        build_scripts: vec![
            Instruction::root(format!(
                r#"
                mkdir -p ${{JULIA_PATH}} && \
                curl -sSL "https://julialang-s3.julialang.org/bin/linux/x64/{minor}/julia-${{JULIA_VERSION}}-linux-x86_64.tar.gz" | tar -xz -C ${{JULIA_PATH}} --strip-components 1 && \
                mkdir -p ${{JULIA_DEPOT_PATH}} && \
                chown ${{NB_USER}}:${{NB_USER}} -R ${{JULIA_DEPOT_PATH}}
                "#
            )),
            Instruction::build_user(
                r#"
                JUPYTER=${NB_PYTHON_PREFIX}/bin/jupyter PYTHON=${NB_PYTHON_PREFIX}/bin/python \
                julia -e 'using Pkg; Pkg.add("IJulia"); using IJulia; installkernel("Julia", "--project=${REPO_DIR}");'
                "#,
            ),
        ],
        assemble_scripts,
        ..Default::default()
    })
}

/// `install.R` and `DESCRIPTION` steps shared by the R-based variants.
fn r_assemble(ctx: &RepoContext) -> Vec<Instruction> {
    let mut scripts = Vec::new();
    if ctx.has_file("install.R") {
        scripts.push(Instruction::build_user(format!(
            "Rscript {}",
            ctx.binder_path("install.R")
        )));
    }
    if !ctx.has_binder_dir() && ctx.has_file("DESCRIPTION") {
        scripts.push(Instruction::build_user(
            r#"R --quiet -e "devtools::install_local(getwd())""#,
        ));
    }
    scripts
}

fn r_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    let mut layer = Layer {
        base_packages: package_set(&["libssl-dev", "libxml2-dev", "r-base", "r-base-dev"]),
        build_scripts: vec![Instruction::build_user(
            r#"
            R --quiet -e "install.packages(c('devtools', 'IRkernel'))" && \
            R --quiet -e "IRkernel::installspec(prefix='${NB_PYTHON_PREFIX}')"
            "#,
        )],
        assemble_scripts: r_assemble(ctx),
        ..Default::default()
    };

    if let Some(date) = ctx.settings().r_snapshot_date {
        layer.env.push(pair("R_SNAPSHOT_DATE", date.to_string()));
        layer.build_scripts.insert(
            0,
            Instruction::root(format!(
                r#"
                echo "options(repos = c(CRAN = 'https://packagemanager.posit.co/cran/{date}'))" \
                    > /etc/R/Rprofile.site
                "#
            )),
        );
    }

    Ok(layer)
}

fn r_jupyter_layer(_ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        build_scripts: vec![Instruction::root("mkdir -p ${HOME}/work")],
        ..Default::default()
    })
}

fn rocker_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        base_image: Some("rocker/geospatial:3.5.1".to_string()),
        path: vec!["/usr/lib/rstudio-server/bin/".to_string()],
        files: FileManifest::new().with(ctx.support_file("r/start.sh"), "/start.sh"),
        build_scripts: vec![
            Instruction::root(
                r#"
                mkdir -p /WholeTale && \
                chown rstudio:rstudio /WholeTale
                "#,
            ),
            Instruction::root(format!(
                r#"
                curl --silent --location --fail {RSTUDIO_URL} > /tmp/rstudio.deb && \
                echo '{RSTUDIO_MD5} /tmp/rstudio.deb' | md5sum -c - && \
                dpkg -i /tmp/rstudio.deb && \
                rm /tmp/rstudio.deb
                "#
            )),
            Instruction::root("chown -R rstudio:rstudio /etc/rstudio"),
        ],
        env: vec![pair("PASSWORD", "thispasswordisnotusedanywhere")],
        assemble_scripts: r_assemble(ctx),
        start_script: Some("/start.sh".to_string()),
        ..Default::default()
    })
}

fn spark_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        base_image: Some("jupyter/pyspark-notebook:abdb27a6dfbb".to_string()),
        files: jupyter_files(ctx),
        assemble_scripts: pip_requirements(ctx, "pip").into_iter().collect(),
        ..Default::default()
    })
}

/// Standalone OpenRefine server; shares nothing with the notebook chain.
fn openrefine_layer(_ctx: &RepoContext) -> Result<Layer, ComposeError> {
    Ok(Layer {
        base_image: Some("ubuntu:xenial-20180726".to_string()),
        build_env: vec![pair("OR_VER", OPENREFINE_VERSION)],
        build_scripts: vec![
            Instruction::root(
                r#"
                mkdir -p /app && cd /app && \
                apt-get update -qqy && \
                apt-get install -y wget ant openjdk-8-jdk && \
                wget https://github.com/OpenRefine/OpenRefine/archive/${OR_VER}.tar.gz && \
                tar xf ${OR_VER}.tar.gz && \
                OpenRefine-${OR_VER}/refine build && \
                rm -rf ${OR_VER}.tar.gz && \
                apt-get remove -y ant openjdk-8-jdk && \
                apt-get install -y openjdk-8-jre-headless && \
                apt autoremove -qy && \
                apt-get clean && \
                rm -rf /var/lib/apt/lists/*
                "#,
            ),
            Instruction::root("useradd -m -g 100 -G 100 -u 1000 -s /bin/bash wtuser"),
            Instruction::root("mkdir -p /wholetale && chown 1000:100 /wholetale"),
        ],
        appendix: Some(
            "EXPOSE 3333\nVOLUME /wholetale\nWORKDIR /wholetale\nUSER wtuser\n\
             CMD /app/OpenRefine-${OR_VER}/refine -i 0.0.0.0 -d /wholetale/workspace/openrefine"
                .to_string(),
        ),
        ..Default::default()
    })
}

const DESKTOP_LAUNCHERS: &str = r#"
mkdir -p ${HOME}/Desktop && \
printf "[Desktop Entry]\nVersion=1.0\nType=Application\nName=Terminal\nExec=exo-open --launch TerminalEmulator\nIcon=utilities-terminal\nPath=${HOME}/work/workspace\nTerminal=false\n" \
    > ${HOME}/Desktop/Terminal.desktop && \
printf "[Desktop Entry]\nVersion=1.0\nType=Application\nName=Firefox\nExec=firefox %u\nIcon=firefox\nTerminal=false\n" \
    > ${HOME}/Desktop/Firefox.desktop && \
chmod +x ${HOME}/Desktop/*.desktop
"#;

const DESKTOP_PACKAGES: &[&str] = &[
    "apt-transport-https",
    "dbus-x11",
    "firefox",
    "gnupg",
    "mousepad",
    "python-websockify",
    "software-properties-common",
    "wget",
    "x11-apps",
    "x11-utils",
    "xfce4",
    "xfonts-base",
    "xubuntu-icon-theme",
    "xvfb",
];

fn xpra_install(pinned: bool) -> Instruction {
    let packages = if pinned {
        "xpra=4.2.3-r7-2 xpra-html5=4.5.1-r1046-1"
    } else {
        "xpra xpra-html5"
    };
    Instruction::root(format!(
        r#"
        wget -q https://xpra.org/gpg.asc -O- | apt-key add - && \
        add-apt-repository "deb https://xpra.org/ bionic main" && \
        DEBIAN_FRONTEND=noninteractive apt-get install -y {packages} && \
        mkdir -p /run/xpra && chmod 755 /run/xpra && \
        mkdir -p /run/user/${{NB_UID}} && chown ${{NB_UID}} /run/user/${{NB_UID}} && chmod 700 /run/user/${{NB_UID}}
        "#
    ))
}

fn matlab_install(version: &str, products: &str) -> Instruction {
    Instruction::root(format!(
        "--mount=type=bind,target=/matlab-install,source=/matlab-install/,from=matlab-install:{version} \
         cd /matlab-install && ./install -mode silent -outputFile /dev/stdout \
         -destinationFolder /usr/local/MATLAB/{version} \
         -licensePath /matlab-install/network.lic -agreeToLicense yes \
         -fileInstallationKey ${{FILE_INSTALLATION_KEY}} {products} \
         | grep --line-buffered -v fileInstallationKey \
         | tee /dev/stderr | grep 'End - Successful'"
    ))
}

fn matlab_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    let version = validate_setting("VERSION", ctx.env_or("VERSION", DEFAULT_MATLAB_VERSION))?;
    let proxy_version = validate_setting(
        "WT_MATLAB_PROXY_VERSION",
        ctx.env_or("WT_MATLAB_PROXY_VERSION", DEFAULT_MATLAB_PROXY_VERSION),
    )?;

    let mut preassemble_scripts = Vec::new();
    if let Some(text) = ctx
        .read_file("toolboxes.txt")
        .map_err(io_error(ctx, "toolboxes.txt"))?
    {
        let products = list_entries(&text)
            .map(|toolbox| validate_setting("toolboxes.txt", toolbox).map(|t| format!("-{t}")))
            .collect::<Result<Vec<_>, _>>()?;
        if !products.is_empty() {
            preassemble_scripts.push(matlab_install(version, &products.join(" ")));
        }
    }

    let mut base_packages = package_set(DESKTOP_PACKAGES);
    base_packages.extend(package_set(&[
        "ca-certificates",
        "csh",
        "curl",
        "g++",
        "gcc",
        "gfortran",
        "libasound2",
        "libatk1.0-0",
        "libc6",
        "libcairo2",
        "libcap2",
        "libcups2",
        "libdbus-1-3",
        "libfontconfig1",
        "libgconf-2-4",
        "libgdk-pixbuf2.0-0",
        "libglib2.0-0",
        "libgstreamer-plugins-base1.0-0",
        "libgstreamer1.0-0",
        "libgtk2.0-0",
        "libnss3",
        "libpam0g",
        "libpango-1.0-0",
        "libsm6",
        "libsndfile1",
        "libx11-6",
        "libx11-xcb1",
        "libxcomposite1",
        "libxcursor1",
        "libxdamage1",
        "libxext6",
        "libxft2",
        "libxi6",
        "libxrandr2",
        "libxrender1",
        "libxss1",
        "libxt6",
        "libxtst6",
        "locales-all",
        "lsb-release",
        "procps",
        "python3-pip",
        "sudo",
        "x11vnc",
        "xkb-data",
        "zlib1g",
    ]));

    Ok(Layer {
        build_args: vec!["FILE_INSTALLATION_KEY".to_string()],
        base_packages,
        build_env: vec![
            pair("MLM_LICENSE_FILE", "/licenses/matlab/network.lic"),
            pair("BASE_URL", "/matlab"),
            pair("APP_PORT", "8888"),
        ],
        path: vec![format!("/usr/local/MATLAB/{version}/bin")],
        build_scripts: vec![
            xpra_install(true),
            matlab_install(version, "-product.MATLAB"),
            Instruction::build_user(format!(
                "${{NB_PYTHON_PREFIX}}/bin/pip install matlab_kernel jupyter-matlab-proxy=={proxy_version}"
            )),
            Instruction::root(
                "cd /usr/local/MATLAB/*/extern/engines/python && ${NB_PYTHON_PREFIX}/bin/python setup.py install",
            ),
            Instruction::root(
                r#"
                DEBIAN_FRONTEND=noninteractive apt-get install -y matlab-support && \
                mkdir -p ${HOME}/.matlab && \
                chown -R ${NB_USER}:${NB_USER} ${HOME}/.matlab
                "#,
            ),
            Instruction::build_user(DESKTOP_LAUNCHERS),
        ],
        preassemble_scripts,
        ..Default::default()
    })
}

fn stata_layer(ctx: &RepoContext) -> Result<Layer, ComposeError> {
    let version = validate_setting("VERSION", ctx.env_or("VERSION", DEFAULT_STATA_VERSION))?;

    let mut preassemble_files = FileManifest::new();
    let mut assemble_scripts = Vec::new();
    if ctx.has_file("install.do") {
        let install_do = ctx.binder_path("install.do");
        preassemble_files.insert(install_do.clone(), install_do.clone());
        assemble_scripts.push(Instruction::root(format!(
            r#"
            echo ${{STATA_LICENSE_ENCODED}} | base64 -d > /usr/local/stata/stata.lic && \
            /usr/local/stata/stata 'sysdir set PLUS /usr/local/stata/ado/site' < {install_do} && \
            rm /usr/local/stata/stata.lic
            "#
        )));
    }

    let mut base_packages = package_set(DESKTOP_PACKAGES);
    base_packages.extend(package_set(&["libgtk2.0-0", "libpng16-16", "libtinfo5", "xxd"]));

    Ok(Layer {
        build_args: vec!["STATA_LICENSE_ENCODED".to_string()],
        base_packages,
        path: vec!["/usr/local/stata/".to_string()],
        build_scripts: vec![
            xpra_install(false),
            Instruction::root("mkdir -p /usr/local/stata"),
            Instruction::root(format!(
                "--mount=type=bind,target=/stata-install,source=/usr/local/stata/,from=stata-install:{version} \
                 cp -r /stata-install/* /usr/local/stata"
            )),
            Instruction::build_user(
                r#"
                ${NB_PYTHON_PREFIX}/bin/pip install stata_kernel==1.10.5 && \
                ${NB_PYTHON_PREFIX}/bin/python -m stata_kernel.install && \
                sed -i "s/stata-mp/stata/g" ${HOME}/.stata_kernel.conf
                "#,
            ),
            Instruction::root(r#"sed -i "s/tray = yes/tray = no/g" /etc/xpra/conf.d/05_features.conf"#),
            Instruction::build_user(DESKTOP_LAUNCHERS),
            Instruction::root(
                r#"
                mkdir -p /usr/local/stata/ado/plus /usr/local/stata/ado/site && \
                printf "sysdir set SITE /usr/local/stata/ado/site\n" > /usr/local/stata/profile.do
                "#,
            ),
        ],
        preassemble_files,
        assemble_scripts,
        ..Default::default()
    })
}
